//! Byte-mode transport: undifferentiated streaming, flow control against the
//! configured buffer sizes, and shutdown behavior.

use super::util::{breathe, byte_options, device, TestResult};
use crate::{Access, PipeError, PipeFlags, ReadOutcome};
use color_eyre::eyre::ensure;

const DUPLEX: Access = Access::READ.union(Access::WRITE);

#[tokio::test]
async fn separate_writes_read_as_one_run() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("runs"))?;
    let client = dev.connect("runs", DUPLEX)?;

    client.write(b"01234").await?;
    client.write(b"abc").await?;
    ensure_eq!(server.read(8).await?, ReadOutcome::Data(b"01234abc".to_vec()));
    Ok(())
}

#[tokio::test]
async fn read_pends_until_bytes_arrive() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("pendread"))?;
    let client = dev.connect("pendread", DUPLEX)?;

    let read = tokio::spawn(async move { (server.read(8).await, server) });
    breathe().await;
    ensure!(!read.is_finished());

    client.write(b"go").await?;
    let (outcome, _server) = read.await?;
    ensure_eq!(outcome?, ReadOutcome::Data(b"go".to_vec()));
    Ok(())
}

#[tokio::test]
async fn writer_parks_on_a_full_buffer() -> TestResult {
    let dev = device();
    // client→server direction holds 8 bytes
    let server = dev.create(&byte_options("narrow").in_buffer_size(8usize))?;
    let client = dev.connect("narrow", DUPLEX)?;

    let write = tokio::spawn(async move { (client.write(&[5; 20]).await, client) });
    breathe().await;
    ensure!(!write.is_finished());

    // draining makes room; the writer finishes the whole buffer
    let mut total = 0;
    while total < 20 {
        total += server.read(20).await?.bytes().len();
    }
    let (written, _client) = write.await?;
    ensure_eq!(written?, 20);
    Ok(())
}

#[tokio::test]
async fn peek_requires_message_framing() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("nopeek"))?;
    let client = dev.connect("nopeek", DUPLEX)?;
    ensure_eq!(server.peek(8).err(), Some(PipeError::NotSupported));
    ensure_eq!(client.peek(8).err(), Some(PipeError::NotSupported));
    Ok(())
}

#[tokio::test]
async fn client_close_leaves_the_backlog_readable() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("leftover"))?;
    let client = dev.connect("leftover", DUPLEX)?;

    client.write(b"remains").await?;
    drop(client);
    ensure_eq!(server.read(16).await?, ReadOutcome::Data(b"remains".to_vec()));
    ensure_eq!(server.read(16).await.err(), Some(PipeError::Broken));
    ensure_eq!(server.write(b"echo").await.err(), Some(PipeError::Broken));
    Ok(())
}

#[tokio::test]
async fn server_close_lets_the_client_drain_then_breaks() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("serverdrop"))?;
    let client = dev.connect("serverdrop", DUPLEX)?;

    server.write(b"parting").await?;
    drop(server);
    ensure_eq!(client.read(16).await?, ReadOutcome::Data(b"parting".to_vec()));
    ensure_eq!(client.read(16).await.err(), Some(PipeError::Broken));
    ensure_eq!(client.write(b"x").await.err(), Some(PipeError::Broken));
    Ok(())
}

#[tokio::test]
async fn nonblocking_ops_never_pend() -> TestResult {
    let dev = device();
    let server = dev.create(&byte_options("nowait").out_buffer_size(8usize))?;
    let client = dev.connect("nowait", DUPLEX)?;
    server.set_flags(PipeFlags::NONBLOCKING)?;

    // empty buffer: no data rather than a pending read
    ensure_eq!(server.read(8).await.err(), Some(PipeError::NoData));
    // full buffer: a nonblocking write takes only what fits
    ensure_eq!(server.write(&[3; 20]).await?, 8);
    ensure_eq!(server.write(&[3; 20]).await?, 0);
    ensure_eq!(client.read(20).await?, ReadOutcome::Data(vec![3; 8]));
    Ok(())
}
