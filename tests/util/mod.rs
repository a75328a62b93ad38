//! Test utilities: error reporting plus shorthand constructors for the
//! device and the two transport configurations.
#![allow(dead_code, unused_macros)]

#[macro_use]
mod eyre;

pub use eyre::*;

use crate::{PipeDevice, PipeMode, PipeOptions};

/// A fresh, empty namespace per test; no names are shared between tests.
pub fn device() -> PipeDevice {
    install();
    PipeDevice::new()
}

/// Byte-mode duplex pipe with default buffer sizes.
pub fn byte_options(name: &str) -> PipeOptions<'static> {
    PipeOptions::new(name.to_string())
}

/// Message-mode duplex pipe whose server also reads message-typed, with
/// thresholds small enough to exercise flow control but large enough that
/// ordinary test frames are acknowledged immediately.
pub fn msg_options(name: &str) -> PipeOptions<'static> {
    PipeOptions::new(name.to_string())
        .mode(PipeMode::Messages)
        .read_mode(PipeMode::Messages)
        .in_buffer_size(64usize)
        .out_buffer_size(64usize)
}

/// Lets freshly spawned tasks run up to their first suspension point.
pub async fn breathe() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}
