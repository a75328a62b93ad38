//! The local byte-stream transport: a connected pair of independently
//! nonblocking endpoints with per-direction capacity.
//!
//! Byte-mode connections are wired through one of these pairs instead of the
//! server's frame queues. Each direction is a bounded ring: writers park
//! when the peer's backlog reaches capacity and resume as the reader drains
//! it. There deliberately is no "buffer drained" notification — the flush
//! path polls [`unread_by_peer`](ByteStream::unread_by_peer) instead, which
//! keeps the polling compromise isolated here.

use crate::LOCK_POISON;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;

/// Capacity applied when the configuration leaves a buffer size hint at
/// zero.
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Marker for operations on a direction whose other side is gone.
pub(crate) struct Closed;

struct DirState {
    buf: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

struct Direction {
    state: Mutex<DirState>,
    readable: Notify,
    writable: Notify,
}

impl Direction {
    fn new(capacity: usize) -> Arc<Self> {
        let capacity = if capacity == 0 { DEFAULT_BUFFER_SIZE } else { capacity };
        Arc::new(Self {
            state: Mutex::new(DirState { buf: VecDeque::new(), capacity, closed: false }),
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }
}

/// One endpoint of a connected byte-stream pair.
///
/// Clones refer to the same endpoint; each direction assumes a single
/// waiter at a time, per the crate's dispatch discipline.
#[derive(Clone)]
pub(crate) struct ByteStream {
    recv: Arc<Direction>,
    send: Arc<Direction>,
}

/// Creates a connected pair. `first_recv_capacity` bounds the data flowing
/// *to* the first endpoint, `second_recv_capacity` the data flowing to the
/// second; zero selects [`DEFAULT_BUFFER_SIZE`].
pub(crate) fn pair(first_recv_capacity: usize, second_recv_capacity: usize) -> (ByteStream, ByteStream) {
    let to_first = Direction::new(first_recv_capacity);
    let to_second = Direction::new(second_recv_capacity);
    (
        ByteStream { recv: Arc::clone(&to_first), send: Arc::clone(&to_second) },
        ByteStream { recv: to_second, send: to_first },
    )
}

impl ByteStream {
    /// Reads up to `max_len` bytes, waiting until at least one is available.
    /// Returns `None` once the stream is shut down and drained.
    pub async fn read(&self, max_len: usize) -> Option<Vec<u8>> {
        loop {
            let notified = self.recv.readable.notified();
            {
                let mut st = self.recv.state.lock().expect(LOCK_POISON);
                if !st.buf.is_empty() {
                    let n = max_len.min(st.buf.len());
                    let data: Vec<u8> = st.buf.drain(..n).collect();
                    drop(st);
                    self.recv.writable.notify_one();
                    return Some(data);
                }
                if st.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Nonblocking read: `None` when shut down and drained, an empty vector
    /// when nothing is buffered right now.
    pub fn try_read(&self, max_len: usize) -> Option<Vec<u8>> {
        let mut st = self.recv.state.lock().expect(LOCK_POISON);
        if !st.buf.is_empty() {
            let n = max_len.min(st.buf.len());
            let data: Vec<u8> = st.buf.drain(..n).collect();
            drop(st);
            self.recv.writable.notify_one();
            Some(data)
        } else if st.closed {
            None
        } else {
            Some(Vec::new())
        }
    }

    /// Writes the whole buffer, waiting for capacity as the peer drains.
    pub async fn write(&self, data: &[u8]) -> Result<usize, Closed> {
        let mut written = 0;
        loop {
            let notified = self.send.writable.notified();
            {
                let mut st = self.send.state.lock().expect(LOCK_POISON);
                if st.closed {
                    return Err(Closed);
                }
                let space = st.capacity.saturating_sub(st.buf.len());
                if space > 0 || data.len() == written {
                    let n = space.min(data.len() - written);
                    st.buf.extend(&data[written..written + n]);
                    written += n;
                    drop(st);
                    if n > 0 {
                        self.send.readable.notify_one();
                    }
                    if written == data.len() {
                        return Ok(written);
                    }
                    continue;
                }
            }
            notified.await;
        }
    }

    /// Nonblocking write: takes what fits, possibly nothing.
    pub fn try_write(&self, data: &[u8]) -> Result<usize, Closed> {
        let mut st = self.send.state.lock().expect(LOCK_POISON);
        if st.closed {
            return Err(Closed);
        }
        let n = st.capacity.saturating_sub(st.buf.len()).min(data.len());
        st.buf.extend(&data[..n]);
        drop(st);
        if n > 0 {
            self.send.readable.notify_one();
        }
        Ok(n)
    }

    /// Bytes this endpoint has sent that the peer has not yet consumed.
    pub fn unread_by_peer(&self) -> usize {
        self.send.state.lock().expect(LOCK_POISON).buf.len()
    }

    /// Shuts the connection down from this endpoint's side: the peer may
    /// drain what was already sent to it and then sees end-of-stream, while
    /// this endpoint's own unread input is discarded and further writes to
    /// it fail.
    pub fn close(&self) {
        {
            let mut st = self.send.state.lock().expect(LOCK_POISON);
            st.closed = true;
        }
        self.send.readable.notify_one();
        self.send.writable.notify_one();
        {
            let mut st = self.recv.state.lock().expect(LOCK_POISON);
            st.closed = true;
            st.buf.clear();
        }
        self.recv.readable.notify_one();
        self.recv.writable.notify_one();
    }
}
