//! Static per-name pipe configuration and the flag types shared across the
//! request surface.

use crate::status::PipeError;
use bitflags::bitflags;
use std::{borrow::Cow, num::NonZeroU32, time::Duration};

/// Specifies how data written into a pipe is framed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PipeMode {
    /// Byte stream mode, erasing the boundaries of separate writes.
    Bytes,
    /// Message stream mode, preserving each write as a discrete frame which
    /// readers can consume one at a time.
    Messages,
}

bitflags! {
    /// Access a connecting client requests on a named pipe.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        /// The client intends to read from the pipe.
        const READ = 1 << 0;
        /// The client intends to write to the pipe.
        const WRITE = 1 << 1;
    }

    /// The sharing mask established by the first creator of a named pipe:
    /// which access directions clients may request at all.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ShareMode: u32 {
        /// Clients may request read access.
        const READ = 1 << 0;
        /// Clients may request write access.
        const WRITE = 1 << 1;
    }

    /// Mode flags carried by each pipe end.
    ///
    /// `MESSAGE_WRITE` is fixed by the pipe's static configuration;
    /// `MESSAGE_READ` and `NONBLOCKING` can be adjusted per end via
    /// [`set_flags`](crate::ServerHandle::set_flags). `SERVER_END` is
    /// report-only.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct PipeFlags: u32 {
        /// Writes are framed as discrete messages.
        const MESSAGE_WRITE = 1 << 0;
        /// This end reads one message frame per call instead of a byte run.
        const MESSAGE_READ = 1 << 1;
        /// Operations that would otherwise stay pending fail immediately
        /// with [`NoData`](crate::PipeError::NoData) or complete without
        /// waiting for acknowledgement.
        const NONBLOCKING = 1 << 2;
        /// Reported by [`info`](crate::ServerHandle::info) for server-side
        /// handles.
        const SERVER_END = 1 << 3;
    }
}

/// Flags a caller may change after creation.
pub(crate) const SETTABLE_FLAGS: PipeFlags =
    PipeFlags::MESSAGE_READ.union(PipeFlags::NONBLOCKING);

/// Configuration of a named pipe, applied by the first create request for a
/// name and fixed for the pipe's lifetime.
///
/// The only way to obtain server instances is to pass one of these to
/// [`PipeDevice::create`](crate::PipeDevice::create).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PipeOptions<'a> {
    /// The pipe's name within its device. Lookup is ASCII-case-insensitive;
    /// the first creator's spelling is kept for display.
    pub name: Cow<'a, str>,
    /// Which access directions connecting clients may request. Must not be
    /// empty.
    pub sharing: ShareMode,
    /// Maximum number of concurrently existing server instances, `None`
    /// meaning unlimited.
    pub max_instances: Option<NonZeroU32>,
    /// Buffer size hint for the client→server direction. Zero selects the
    /// crate default. In message mode this is the server end's flow-control
    /// threshold and is used verbatim, including zero.
    pub in_buffer_size: usize,
    /// Buffer size hint for the server→client direction, analogous to
    /// `in_buffer_size`.
    pub out_buffer_size: usize,
    /// Default deadline for wait-for-instance requests that do not carry
    /// their own.
    pub wait_timeout: Duration,
    /// How writes are framed on this pipe.
    pub mode: PipeMode,
    /// How the created server instance reads: `Messages` requires `mode` to
    /// be `Messages` as well.
    pub read_mode: PipeMode,
    /// Whether the created server instance starts out in nonblocking mode.
    pub nonblocking: bool,
}

macro_rules! genset {
    ($name:ident : $ty:ty) => {
        /// Sets the field of the same name to the specified value.
        #[must_use = "builder setters take the entire structure and return the result"]
        pub fn $name(mut self, $name: impl Into<$ty>) -> Self {
            self.$name = $name.into();
            self
        }
    };
    ($($name:ident : $ty:ty),+ $(,)?) => {
        $(genset!($name : $ty);)+
    };
}

impl<'a> PipeOptions<'a> {
    /// Creates a new option table with defaults: duplex sharing, unlimited
    /// instances, default buffer sizes, a 50 ms wait timeout and byte-mode
    /// transport.
    pub fn new(name: impl Into<Cow<'a, str>>) -> Self {
        Self {
            name: name.into(),
            sharing: ShareMode::READ | ShareMode::WRITE,
            max_instances: None,
            in_buffer_size: 0,
            out_buffer_size: 0,
            wait_timeout: Duration::from_millis(50),
            mode: PipeMode::Bytes,
            read_mode: PipeMode::Bytes,
            nonblocking: false,
        }
    }

    genset!(
        sharing: ShareMode,
        max_instances: Option<NonZeroU32>,
        in_buffer_size: usize,
        out_buffer_size: usize,
        wait_timeout: Duration,
        mode: PipeMode,
        read_mode: PipeMode,
        nonblocking: bool,
    );

    /// Clones the name so the option table no longer borrows anything.
    pub fn to_owned(&self) -> PipeOptions<'static> {
        PipeOptions {
            name: Cow::Owned(self.name.clone().into_owned()),
            sharing: self.sharing,
            max_instances: self.max_instances,
            in_buffer_size: self.in_buffer_size,
            out_buffer_size: self.out_buffer_size,
            wait_timeout: self.wait_timeout,
            mode: self.mode,
            read_mode: self.read_mode,
            nonblocking: self.nonblocking,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PipeError> {
        if self.name.is_empty() || self.name.contains('\0') {
            return Err(PipeError::InvalidParameter);
        }
        if self.sharing.is_empty() {
            return Err(PipeError::InvalidParameter);
        }
        if self.read_mode == PipeMode::Messages && self.mode == PipeMode::Bytes {
            return Err(PipeError::InvalidParameter);
        }
        Ok(())
    }

    /// Flags shared by every end of the pipe.
    pub(crate) fn static_flags(&self) -> PipeFlags {
        match self.mode {
            PipeMode::Messages => PipeFlags::MESSAGE_WRITE,
            PipeMode::Bytes => PipeFlags::empty(),
        }
    }

    /// Initial flags for the server end this option table creates.
    pub(crate) fn server_end_flags(&self) -> PipeFlags {
        let mut flags = self.static_flags();
        if self.read_mode == PipeMode::Messages {
            flags |= PipeFlags::MESSAGE_READ;
        }
        if self.nonblocking {
            flags |= PipeFlags::NONBLOCKING;
        }
        flags
    }
}

/// Snapshot of a pipe's configuration and instance accounting, as reported
/// by the `info` method on either handle type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PipeInfo {
    /// The queried end's mode flags, with [`PipeFlags::SERVER_END`] set for
    /// server handles.
    pub flags: PipeFlags,
    /// The pipe's sharing mask.
    pub sharing: ShareMode,
    /// The configured instance limit, `None` meaning unlimited.
    pub max_instances: Option<NonZeroU32>,
    /// How many server instances currently exist.
    pub instances: u32,
    /// Client→server buffer size hint, as configured.
    pub in_buffer_size: usize,
    /// Server→client buffer size hint, as configured.
    pub out_buffer_size: usize,
}
