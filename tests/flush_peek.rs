//! Flush completion semantics for both transports, and the peek snapshot.

use super::util::{breathe, byte_options, device, msg_options, TestResult};
use crate::{Access, ReadOutcome};
use color_eyre::eyre::ensure;
use std::{sync::Arc, time::Duration};

const DUPLEX: Access = Access::READ.union(Access::WRITE);

#[tokio::test(start_paused = true)]
async fn byte_flush_completes_once_polled_empty() -> TestResult {
    let dev = device();
    let server = Arc::new(dev.create(&byte_options("poll"))?);
    let client = dev.connect("poll", DUPLEX)?;

    server.write(b"pending").await?;
    let flush = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.flush().await })
    };
    // two poll periods with the backlog still in place
    tokio::time::sleep(Duration::from_millis(250)).await;
    ensure!(!flush.is_finished());

    client.read(16).await?;
    // the next poll observes the drained buffer
    tokio::time::sleep(Duration::from_millis(150)).await;
    ensure!(flush.is_finished());
    flush.await??;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn byte_flush_survives_client_close() -> TestResult {
    let dev = device();
    let server = Arc::new(dev.create(&byte_options("outlive"))?);
    let client = dev.connect("outlive", DUPLEX)?;

    server.write(b"never read").await?;
    let flush = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.flush().await })
    };
    breathe().await;
    ensure!(!flush.is_finished());

    // the closing client discards its unread backlog, which is what the
    // next poll tick sees
    drop(client);
    tokio::time::sleep(Duration::from_millis(150)).await;
    ensure!(flush.is_finished());
    flush.await??;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn message_flush_tracks_consumption_exactly() -> TestResult {
    let dev = device();
    let server = Arc::new(dev.create(&msg_options("exact"))?);
    let client = dev.connect("exact", DUPLEX)?;

    server.write(b"hello").await?;
    let flush = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.flush().await })
    };
    breathe().await;
    ensure!(!flush.is_finished());

    // a partial drain is not enough
    ensure_eq!(client.read(3).await?, ReadOutcome::Data(b"hel".to_vec()));
    breathe().await;
    ensure!(!flush.is_finished());

    // consuming the last byte completes the flush with no timer involved
    ensure_eq!(client.read(16).await?, ReadOutcome::Data(b"lo".to_vec()));
    breathe().await;
    ensure!(flush.is_finished());
    flush.await??;
    Ok(())
}

#[tokio::test]
async fn client_flush_waits_for_server_consumption() -> TestResult {
    let dev = device();
    let server = dev.create(&msg_options("clientside"))?;
    let client = Arc::new(dev.connect("clientside", DUPLEX)?);

    client.write(b"one").await?;
    client.write(b"two").await?;
    let flush = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.flush().await })
    };
    breathe().await;
    ensure!(!flush.is_finished());

    server.read(16).await?;
    server.read(16).await?;
    breathe().await;
    ensure!(flush.is_finished());
    flush.await??;
    Ok(())
}

#[tokio::test]
async fn flush_with_no_backlog_completes_immediately() -> TestResult {
    let dev = device();
    let byte_server = dev.create(&byte_options("noop"))?;
    let _byte_client = dev.connect("noop", DUPLEX)?;
    byte_server.flush().await?;

    let msg_server = dev.create(&msg_options("noop2"))?;
    let msg_client = dev.connect("noop2", DUPLEX)?;
    msg_server.flush().await?;
    msg_client.flush().await?;
    Ok(())
}

#[tokio::test]
async fn peek_reports_the_head_message() -> TestResult {
    let dev = device();
    let server = dev.create(&msg_options("snapshot"))?;
    let client = dev.connect("snapshot", DUPLEX)?;

    client.write(b"01234").await?;
    client.write(b"abc").await?;

    let peeked = server.peek(2)?;
    ensure_eq!(peeked.available, 8);
    ensure_eq!(peeked.message_length, 5);
    ensure_eq!(peeked.data, b"01".to_vec());

    // peeking consumed nothing
    ensure_eq!(server.peek(2)?.available, 8);

    // an overflow read shortens the head frame as seen by peek
    ensure_eq!(server.read(2).await?, ReadOutcome::Overflow(b"01".to_vec()));
    let peeked = server.peek(16)?;
    ensure_eq!(peeked.available, 6);
    ensure_eq!(peeked.message_length, 3);
    ensure_eq!(peeked.data, b"234".to_vec());
    Ok(())
}

#[tokio::test]
async fn peek_on_an_empty_queue() -> TestResult {
    let dev = device();
    let server = dev.create(&msg_options("vacant"))?;
    let _client = dev.connect("vacant", DUPLEX)?;

    let peeked = server.peek(16)?;
    ensure_eq!(peeked.available, 0);
    ensure_eq!(peeked.message_length, 0);
    ensure!(peeked.data.is_empty());
    Ok(())
}
