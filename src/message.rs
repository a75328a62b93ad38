//! Message frames and the read algorithms over a frame queue.

use crate::{
    aqueue::Completer,
    status::{PipeError, ReadOutcome},
};
use std::collections::VecDeque;

/// One writer's payload, framed as a unit, with a read cursor for partial
/// consumption and an optional pending-write acknowledgement.
pub(crate) struct PipeMessage {
    data: Vec<u8>,
    cursor: usize,
    ack: Option<Completer<usize>>,
}

impl PipeMessage {
    /// Copies the payload into a fresh frame, surfacing reservation failure
    /// as `NoMemory`. `ack` is the pending write to acknowledge once flow
    /// control admits the frame (or `None` for writes that complete
    /// immediately).
    pub fn new(bytes: &[u8], ack: Option<Completer<usize>>) -> Result<Self, PipeError> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes.len()).map_err(|_| PipeError::NoMemory)?;
        data.extend_from_slice(bytes);
        Ok(Self { data, cursor: 0, ack })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
    /// Unread bytes left in this frame.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
    pub fn is_fully_read(&self) -> bool {
        self.cursor == self.data.len()
    }
    pub fn awaiting_ack(&self) -> bool {
        self.ack.is_some()
    }
    /// Whether the pending writer stopped waiting for the acknowledgement.
    pub fn ack_abandoned(&self) -> bool {
        self.ack.as_ref().is_some_and(Completer::is_stale)
    }
    /// Completes the pending write with the full frame length.
    pub fn acknowledge(&mut self) {
        if let Some(ack) = self.ack.take() {
            ack.complete(Ok(self.data.len()));
        }
    }
    /// Fails the pending write with a terminal status.
    pub fn fail(&mut self, status: PipeError) {
        if let Some(ack) = self.ack.take() {
            ack.complete(Err(status));
        }
    }
    /// A view of up to `max_len` unread bytes, without advancing the cursor.
    pub fn peek(&self, max_len: usize) -> &[u8] {
        let n = max_len.min(self.remaining());
        &self.data[self.cursor..self.cursor + n]
    }
    fn take(&mut self, max_len: usize) -> &[u8] {
        let n = max_len.min(self.remaining());
        let start = self.cursor;
        self.cursor += n;
        &self.data[start..start + n]
    }
}

pub(crate) fn queue_available(queue: &VecDeque<PipeMessage>) -> usize {
    queue.iter().map(PipeMessage::remaining).sum()
}

/// Message-typed read: consumes from exactly the head frame. The frame is
/// removed (and its write acknowledged) only once fully drained; a read
/// smaller than what remains reports `Overflow` and leaves the tail at the
/// queue head.
///
/// Must only be called on a non-empty queue.
pub(crate) fn read_message(queue: &mut VecDeque<PipeMessage>, max_len: usize) -> ReadOutcome {
    let msg = queue.front_mut().expect("read from an empty message queue");
    let data = msg.take(max_len).to_vec();
    let overflow = !msg.is_fully_read();
    if msg.is_fully_read() {
        msg.acknowledge();
        queue.pop_front();
    }
    if overflow {
        ReadOutcome::Overflow(data)
    } else {
        ReadOutcome::Data(data)
    }
}

/// Byte-typed read over a framed queue: concatenates payloads across as many
/// frames as needed, removing each frame as it empties.
///
/// Must only be called on a non-empty queue.
pub(crate) fn read_bytes(queue: &mut VecDeque<PipeMessage>, max_len: usize) -> ReadOutcome {
    let take = max_len.min(queue_available(queue));
    let mut out = Vec::with_capacity(take);
    loop {
        let Some(front) = queue.front_mut() else { break };
        out.extend_from_slice(front.take(take - out.len()));
        if front.is_fully_read() {
            front.acknowledge();
            queue.pop_front();
        }
        if out.len() >= take {
            break;
        }
    }
    ReadOutcome::Data(out)
}
