//! `PipeEnd`: the shared state for one side of a connection.

use crate::{
    aqueue::AsyncQueue,
    bytes::ByteStream,
    message::{self, PipeMessage},
    options::PipeFlags,
    status::{PipeError, ReadOutcome},
};
use std::collections::VecDeque;

/// Transport wired into an end while it is connected.
pub(crate) enum Transport {
    /// An endpoint of a connected byte-stream pair.
    Bytes(ByteStream),
    /// Server-mediated message framing; there is no underlying stream, data
    /// lives in the peer's frame queue.
    Messages,
}

/// One side of a connection: transport slot, mode flags, peer link, unread
/// frame queue and the pending-operation queues for each direction.
///
/// Peer links are symmetric and always cleared together, within the single
/// locked transition that performs the disconnect.
pub(crate) struct PipeEnd {
    pub transport: Option<Transport>,
    pub flags: PipeFlags,
    /// Slot id of the opposite-side end, in the opposite arena.
    pub peer: Option<u32>,
    /// Flow-control threshold: a pending write is acknowledged once the
    /// reader's accumulated backlog up to its frame fits under this.
    pub buffer_size: usize,
    pub messages: VecDeque<PipeMessage>,
    pub read_q: AsyncQueue<usize, ReadOutcome>,
    pub flush_q: AsyncQueue<(), ()>,
}

impl PipeEnd {
    pub fn new(flags: PipeFlags, buffer_size: usize) -> Self {
        Self {
            transport: None,
            flags,
            peer: None,
            buffer_size,
            messages: VecDeque::new(),
            read_q: AsyncQueue::new(),
            flush_q: AsyncQueue::new(),
        }
    }

    /// Whether I/O on this end is mediated by the server's frame queues
    /// rather than a byte stream.
    pub fn framed(&self) -> bool {
        self.flags.contains(PipeFlags::MESSAGE_WRITE)
    }
    pub fn message_read(&self) -> bool {
        self.flags.contains(PipeFlags::MESSAGE_READ)
    }
    pub fn nonblocking(&self) -> bool {
        self.flags.contains(PipeFlags::NONBLOCKING)
    }
    pub fn available(&self) -> usize {
        message::queue_available(&self.messages)
    }
    pub fn byte_stream(&self) -> Option<ByteStream> {
        match &self.transport {
            Some(Transport::Bytes(stream)) => Some(stream.clone()),
            _ => None,
        }
    }

    /// One side of a link going down: clears the peer link and, for framed
    /// ends, force-completes pending work with `status` and purges the
    /// queue. An explicit disconnect (`Disconnected`) discards every frame;
    /// a broken peer keeps acknowledged frames readable and fails only the
    /// writes still awaiting acknowledgement.
    ///
    /// Byte-transport cleanup is the stream's own business (see
    /// [`ByteStream::close`]).
    pub fn sever(&mut self, status: PipeError) {
        self.peer = None;
        if !self.framed() {
            return;
        }
        self.flush_q.complete_all(|| Err(status));
        self.read_q.complete_all(|| Err(status));
        if status == PipeError::Disconnected {
            for mut msg in self.messages.drain(..) {
                msg.fail(status);
            }
        } else {
            self.messages.retain_mut(|msg| {
                if msg.awaiting_ack() {
                    msg.fail(status);
                    false
                } else {
                    true
                }
            });
        }
    }
}
