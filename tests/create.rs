//! Creation-time validation, instance accounting and registry lifecycle.

use super::util::{byte_options, device, msg_options, TestResult};
use crate::{Access, PipeError, PipeFlags, ShareMode};
use color_eyre::eyre::ensure;
use std::num::NonZeroU32;

#[tokio::test]
async fn rejects_empty_sharing() -> TestResult {
    let dev = device();
    let opts = byte_options("noshare").sharing(ShareMode::empty());
    ensure_eq!(dev.create(&opts).err(), Some(PipeError::InvalidParameter));
    Ok(())
}

#[tokio::test]
async fn rejects_message_read_on_byte_pipe() -> TestResult {
    let dev = device();
    let opts = byte_options("modeclash").read_mode(crate::PipeMode::Messages);
    ensure_eq!(dev.create(&opts).err(), Some(PipeError::InvalidParameter));
    Ok(())
}

#[tokio::test]
async fn rejects_malformed_names() -> TestResult {
    let dev = device();
    ensure_eq!(dev.create(&byte_options("")).err(), Some(PipeError::InvalidParameter));
    ensure_eq!(dev.create(&byte_options("nul\0name")).err(), Some(PipeError::InvalidParameter));
    Ok(())
}

#[tokio::test]
async fn instance_limit_is_enforced_without_mutation() -> TestResult {
    let dev = device();
    let opts = byte_options("capped").max_instances(NonZeroU32::new(2));
    let first = dev.create(&opts)?;
    let _second = dev.create(&opts)?;
    ensure_eq!(dev.create(&opts).err(), Some(PipeError::InstanceLimit));
    // the failed create must not have touched the count
    ensure_eq!(first.info()?.instances, 2);
    // the limit is permanent until an instance actually goes away
    ensure_eq!(dev.create(&opts).err(), Some(PipeError::InstanceLimit));
    drop(first);
    let _third = dev.create(&opts)?;
    Ok(())
}

#[tokio::test]
async fn sharing_mask_must_match_exactly() -> TestResult {
    let dev = device();
    let _first = dev.create(&byte_options("strict"))?;
    let mismatched = byte_options("strict").sharing(ShareMode::READ);
    ensure_eq!(dev.create(&mismatched).err(), Some(PipeError::AccessDenied));
    Ok(())
}

#[tokio::test]
async fn name_is_freed_with_last_instance() -> TestResult {
    let dev = device();
    let server = dev.create(&msg_options("reborn"))?;
    ensure!(server.info()?.flags.contains(PipeFlags::MESSAGE_WRITE));
    drop(server);
    // the old configuration went with the last instance
    let reborn = dev.create(&byte_options("reborn"))?;
    ensure!(!reborn.info()?.flags.contains(PipeFlags::MESSAGE_WRITE));
    Ok(())
}

#[tokio::test]
async fn names_are_case_insensitive() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("Mixed.Case"))?;
    ensure_eq!(server.name(), "Mixed.Case");
    let client = dev.connect("mixed.CASE", Access::READ | Access::WRITE)?;
    ensure_eq!(client.name(), "Mixed.Case");
    Ok(())
}

#[tokio::test]
async fn info_reports_both_ends() -> TestResult {
    let dev = device();
    let opts = msg_options("introspect").max_instances(NonZeroU32::new(4));
    let server = dev.create(&opts)?;
    let client = dev.connect("introspect", Access::READ | Access::WRITE)?;

    let sinfo = server.info()?;
    ensure!(sinfo.flags.contains(PipeFlags::SERVER_END | PipeFlags::MESSAGE_WRITE));
    ensure!(sinfo.flags.contains(PipeFlags::MESSAGE_READ));
    ensure_eq!(sinfo.instances, 1);
    ensure_eq!(sinfo.max_instances, NonZeroU32::new(4));
    ensure_eq!(sinfo.in_buffer_size, 64);

    let cinfo = client.info()?;
    ensure!(!cinfo.flags.contains(PipeFlags::SERVER_END));
    ensure!(cinfo.flags.contains(PipeFlags::MESSAGE_WRITE));
    ensure_eq!(cinfo.sharing, ShareMode::READ | ShareMode::WRITE);
    Ok(())
}

#[tokio::test]
async fn set_flags_validates_against_configuration() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("flagged"))?;
    // message-read requires a message-write pipe
    ensure_eq!(
        server.set_flags(PipeFlags::MESSAGE_READ).err(),
        Some(PipeError::InvalidParameter),
    );
    // only the documented bits are settable
    ensure_eq!(
        server.set_flags(PipeFlags::SERVER_END).err(),
        Some(PipeError::InvalidParameter),
    );
    server.set_flags(PipeFlags::NONBLOCKING)?;
    ensure!(server.info()?.flags.contains(PipeFlags::NONBLOCKING));
    // flags are replaced, not accumulated
    server.set_flags(PipeFlags::empty())?;
    ensure!(!server.info()?.flags.contains(PipeFlags::NONBLOCKING));
    Ok(())
}
