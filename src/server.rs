//! The listening-side instance: its connection state machine and handle.

use crate::{
    aqueue::{completion, AsyncQueue},
    device::DeviceShared,
    end::PipeEnd,
    options::{PipeFlags, PipeInfo},
    pipe::{EndRef, NamedPipe},
    status::{PeekOutcome, PipeError, ReadOutcome},
};
use log::trace;
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// Connection state of a server instance.
///
/// ```text
/// Idle ──listen──> WaitOpen ──connect──> Connected ──disconnect──> WaitConnect
///   └────────────────connect───────────────┘  └──client closed──> WaitDisconnect
/// ```
/// `WaitConnect` listens again; `WaitDisconnect` must disconnect first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ServerState {
    /// Freshly created, connectable but not actively listening.
    Idle,
    /// A listen request is pending; connectable with priority.
    WaitOpen,
    /// A client is attached.
    Connected,
    /// The client's handle was closed; leftover data is still readable and
    /// flushable until an explicit disconnect.
    WaitDisconnect,
    /// Explicitly disconnected; a new listen returns it to `WaitOpen`.
    WaitConnect,
}

/// Server-side slot within a pipe's arena.
pub(crate) struct ServerSlot {
    pub state: ServerState,
    pub end: PipeEnd,
    pub client: Option<u32>,
    /// Pending listen completion, resolved when a client connects.
    pub listen_q: AsyncQueue<(), ()>,
    /// Whether the byte-mode flush poll is armed.
    pub flush_poll: bool,
}

impl ServerSlot {
    pub fn new(flags: PipeFlags, buffer_size: usize) -> Self {
        Self {
            state: ServerState::Idle,
            end: PipeEnd::new(flags, buffer_size),
            client: None,
            listen_q: AsyncQueue::new(),
            flush_poll: false,
        }
    }
    pub fn set_state(&mut self, state: ServerState) {
        trace!("server state {:?} -> {:?}", self.state, state);
        self.state = state;
        // the transport handle exists exactly while a connection does
        debug_assert_eq!(
            self.end.transport.is_some(),
            matches!(state, ServerState::Connected | ServerState::WaitDisconnect),
        );
    }
}

/// A handle to one server instance of a named pipe.
///
/// Created by [`PipeDevice::create`](crate::PipeDevice::create). Dropping
/// the handle closes the instance: the peer connection is forced down (a
/// connected client sees [`Broken`](PipeError::Broken)), and the named pipe
/// itself is unregistered along with its last instance.
pub struct ServerHandle {
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) pipe: Arc<NamedPipe>,
    pub(crate) id: u32,
}

impl ServerHandle {
    /// The pipe's name, in its first creator's spelling.
    pub fn name(&self) -> &str {
        &self.pipe.name
    }

    /// Starts listening and resolves once a client connects.
    ///
    /// Valid from `Idle` and `WaitConnect`. A connected instance reports
    /// [`AlreadyConnected`](PipeError::AlreadyConnected), one whose previous
    /// client is still being drained [`NoData`](PipeError::NoData), and a
    /// second concurrent listen [`InvalidParameter`](PipeError::InvalidParameter).
    pub async fn listen(&self) -> Result<(), PipeError> {
        let pending = {
            let mut shared = self.pipe.shared.lock().expect(crate::LOCK_POISON);
            let slot = shared.servers.get_mut(&self.id).ok_or(PipeError::Broken)?;
            match slot.state {
                ServerState::Idle | ServerState::WaitConnect => {
                    let (completer, completion) = completion();
                    slot.listen_q.push((), completer);
                    slot.set_state(ServerState::WaitOpen);
                    completion
                }
                ServerState::Connected => return Err(PipeError::AlreadyConnected),
                ServerState::WaitDisconnect => return Err(PipeError::NoData),
                ServerState::WaitOpen => return Err(PipeError::InvalidParameter),
            }
        };
        // a newly listening instance satisfies device-level waiters
        self.device.satisfy_waiters(&self.pipe.key);
        pending.wait().await
    }

    /// Severs the current connection, discarding unread data on both sides;
    /// any pending client operation fails with
    /// [`Disconnected`](PipeError::Disconnected).
    pub fn disconnect(&self) -> Result<(), PipeError> {
        self.pipe.disconnect_server(self.id)
    }

    /// Reads up to `max_len` bytes; see [`ReadOutcome`] for framing
    /// semantics. Pending while the queue is empty and a peer is connected;
    /// [`Broken`](PipeError::Broken) once the peer is gone and everything is
    /// drained.
    pub async fn read(&self, max_len: usize) -> Result<ReadOutcome, PipeError> {
        self.pipe.read(EndRef::Server(self.id), max_len).await
    }

    /// Writes `data`, pending until acknowledged per the transport's flow
    /// control; [`Disconnected`](PipeError::Disconnected) if no peer.
    pub async fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        self.pipe.write(EndRef::Server(self.id), data).await
    }

    /// Waits until the peer has consumed everything this instance wrote.
    pub async fn flush(&self) -> Result<(), PipeError> {
        self.pipe.flush(EndRef::Server(self.id)).await
    }

    /// Non-destructively reports queued data; message-mode only.
    pub fn peek(&self, max_len: usize) -> Result<PeekOutcome, PipeError> {
        self.pipe.peek(EndRef::Server(self.id), max_len)
    }

    /// Reports the pipe's configuration and this end's mode flags.
    pub fn info(&self) -> Result<PipeInfo, PipeError> {
        self.pipe.info(EndRef::Server(self.id))
    }

    /// Adjusts this end's message-read/nonblocking flags.
    pub fn set_flags(&self, flags: PipeFlags) -> Result<(), PipeError> {
        self.pipe.set_flags(EndRef::Server(self.id), flags)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.pipe.detach_server(self.id) {
            self.device.remove_pipe(&self.pipe.key, &self.pipe);
        }
    }
}

impl Debug for ServerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("pipe", &self.pipe.name)
            .field("id", &self.id)
            .finish()
    }
}
