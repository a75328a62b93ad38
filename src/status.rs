//! The status vocabulary shared by every pipe operation.
//!
//! Operations in this crate either succeed, stay pending (an unresolved
//! future), or terminate with one of the [`PipeError`] statuses below. Two
//! of the "failure" statuses deserve special mention because callers are
//! expected to branch on them rather than bail:
//! - [`Broken`](PipeError::Broken) vs [`Disconnected`](PipeError::Disconnected)
//!   distinguish *how* a peer went missing: `Broken` means the peer existed
//!   and is gone (its handle was closed), `Disconnected` means there is no
//!   peer to talk to in the first place — either the connection was severed
//!   by an explicit disconnect or was never established.
//! - A partial message read is not an error at all; it is reported through
//!   [`ReadOutcome::Overflow`] with the head bytes attached, and the
//!   remainder of the frame stays readable.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Terminal status of a pipe operation that did not complete successfully.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PipeError {
    /// The server instance is listening (or idle) and has no connection, so
    /// the attempted operation makes no sense yet. Also returned by a
    /// disconnect request on an instance that never left the listening
    /// phase.
    Listening,
    /// A listen request was issued on an instance that already has a live
    /// connection.
    AlreadyConnected,
    /// There is no peer on the other side of this end: the connection was
    /// explicitly disconnected, or was never established.
    Disconnected,
    /// The peer existed but its handle has been closed; once any leftover
    /// data is drained, nothing more will ever arrive.
    Broken,
    /// No server instance of the named pipe can accept a connection, or the
    /// name does not exist.
    NotAvailable,
    /// Creating another instance would exceed the pipe's configured maximum.
    InstanceLimit,
    /// The requested access is not covered by the pipe's sharing mask, or a
    /// later creator's configuration contradicts the established one.
    AccessDenied,
    /// Malformed name, empty sharing mask, or a mode-flag combination the
    /// static configuration forbids.
    InvalidParameter,
    /// The deadline of a wait operation elapsed before it could complete.
    IoTimeout,
    /// Queueing the payload failed because memory could not be reserved.
    NoMemory,
    /// The operation is not implemented for this transport; notably, peek
    /// requires message framing.
    NotSupported,
    /// Nothing is available right now and the end is in nonblocking mode, or
    /// a listen was issued while the previous client's data is still being
    /// drained.
    NoData,
}

impl Display for PipeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Listening => "pipe instance is listening",
            Self::AlreadyConnected => "pipe instance is already connected",
            Self::Disconnected => "no process is on the other end of the pipe",
            Self::Broken => "the pipe connection has been broken",
            Self::NotAvailable => "no available instance of the named pipe",
            Self::InstanceLimit => "all instances of the named pipe are in use",
            Self::AccessDenied => "access to the named pipe was denied",
            Self::InvalidParameter => "invalid parameter",
            Self::IoTimeout => "the wait operation timed out",
            Self::NoMemory => "insufficient memory to queue the payload",
            Self::NotSupported => "operation not supported by this transport",
            Self::NoData => "no data available on the pipe",
        };
        f.write_str(msg)
    }
}
impl Error for PipeError {}

/// What a successful read produced.
///
/// A message-typed reader consumes at most one frame per call; if the
/// caller's length budget is smaller than the frame, the prefix comes back
/// as `Overflow` and the rest of the frame remains at the head of the queue
/// for the next read. Byte-typed readers never overflow — they take as much
/// as is available, across as many frames as needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete message (or byte run) that fit the caller's length budget.
    Data(Vec<u8>),
    /// The head of a message that did not fit; the remainder is still
    /// queued.
    Overflow(Vec<u8>),
}

impl ReadOutcome {
    /// The bytes that were actually transferred.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Data(b) | Self::Overflow(b) => b,
        }
    }
    /// Consumes the outcome, returning the transferred bytes.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Data(b) | Self::Overflow(b) => b,
        }
    }
    /// Whether this read truncated a message frame.
    #[inline]
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow(..))
    }
}
impl AsRef<[u8]> for ReadOutcome {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

/// Non-destructive snapshot of an end's incoming queue, as returned by peek.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeekOutcome {
    /// Total unread bytes currently queued for this end.
    pub available: usize,
    /// Remaining length of the frame at the head of the queue, zero if the
    /// queue is empty. A preceding overflow read shortens this.
    pub message_length: usize,
    /// A copy of the head frame's next bytes, bounded by the caller's length
    /// budget.
    pub data: Vec<u8>,
}
