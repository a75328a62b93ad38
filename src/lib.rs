#![doc = include_str!("../README.md")]
#![warn(missing_docs, clippy::panic_in_result_fn)]

mod aqueue;
mod bytes;
mod client;
mod device;
mod end;
mod message;
mod options;
mod pipe;
mod server;
mod status;

pub use {
    client::ClientHandle,
    device::PipeDevice,
    options::{Access, PipeFlags, PipeInfo, PipeMode, PipeOptions, ShareMode},
    server::ServerHandle,
    status::{PeekOutcome, PipeError, ReadOutcome},
};

pub(crate) static LOCK_POISON: &str = "unexpected lock poison";

#[cfg(test)]
#[path = "../tests/index.rs"]
#[allow(clippy::unwrap_used)]
mod tests;
