//! The connecting-side object and handle.

use crate::{
    end::PipeEnd,
    options::{PipeFlags, PipeInfo},
    pipe::{EndRef, NamedPipe},
    status::{PeekOutcome, PipeError, ReadOutcome},
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// Client-side slot within a pipe's arena.
pub(crate) struct ClientSlot {
    pub end: PipeEnd,
    /// Back-reference to the connected server, cleared on disconnect and on
    /// server destruction.
    pub server: Option<u32>,
}

/// A handle to the client end of a named pipe connection.
///
/// Created by [`PipeDevice::connect`](crate::PipeDevice::connect). Dropping
/// the handle closes the client end: the server instance moves to its
/// wait-disconnect phase with leftover data still readable, and its pending
/// operations fail with [`Broken`](PipeError::Broken).
pub struct ClientHandle {
    pub(crate) pipe: Arc<NamedPipe>,
    pub(crate) id: u32,
}

impl ClientHandle {
    /// The pipe's name, in its first creator's spelling.
    pub fn name(&self) -> &str {
        &self.pipe.name
    }

    /// Reads up to `max_len` bytes; see [`ReadOutcome`] for framing
    /// semantics.
    pub async fn read(&self, max_len: usize) -> Result<ReadOutcome, PipeError> {
        self.pipe.read(EndRef::Client(self.id), max_len).await
    }

    /// Writes `data`, pending until acknowledged per the transport's flow
    /// control.
    pub async fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        self.pipe.write(EndRef::Client(self.id), data).await
    }

    /// Waits until the server has consumed everything this end wrote.
    /// Byte-mode client ends complete immediately.
    pub async fn flush(&self) -> Result<(), PipeError> {
        self.pipe.flush(EndRef::Client(self.id)).await
    }

    /// Non-destructively reports queued data; message-mode only.
    pub fn peek(&self, max_len: usize) -> Result<PeekOutcome, PipeError> {
        self.pipe.peek(EndRef::Client(self.id), max_len)
    }

    /// Reports the pipe's configuration and this end's mode flags.
    pub fn info(&self) -> Result<PipeInfo, PipeError> {
        self.pipe.info(EndRef::Client(self.id))
    }

    /// Adjusts this end's message-read/nonblocking flags.
    pub fn set_flags(&self, flags: PipeFlags) -> Result<(), PipeError> {
        self.pipe.set_flags(EndRef::Client(self.id), flags)
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.pipe.detach_client(self.id);
    }
}

impl Debug for ClientHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("pipe", &self.pipe.name)
            .field("id", &self.id)
            .finish()
    }
}
