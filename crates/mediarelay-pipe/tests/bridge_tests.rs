//! Bridge tasks against real FIFOs

#![cfg(unix)]

use std::time::Duration;

use mediarelay_pipe::{drain, feed, ConnectionState, PipeConfig, PipeDirection, PipeEndpoint};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;

fn config(dir: &tempfile::TempDir) -> PipeConfig {
    PipeConfig {
        directory: Some(dir.path().to_path_buf()),
        chunk_size: 1024,
        ..Default::default()
    }
}

/// Open the write end the way a child would, once our read end exists
async fn open_child_sender(endpoint: &PipeEndpoint) -> pipe::Sender {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match pipe::OpenOptions::new().open_sender(endpoint.os_path()) {
                Ok(sender) => return sender,
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    })
    .await
    .expect("read end was never opened")
}

#[tokio::test]
async fn test_drain_delivers_all_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let endpoint =
        PipeEndpoint::open_with(config.options("audio-out", PipeDirection::Inbound)).unwrap();

    let (mut rx, handle) = drain(endpoint.clone(), config.chunk_size, config.channel_capacity);

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut child = open_child_sender(&endpoint).await;
    child.write_all(&payload).await.unwrap();
    drop(child);

    let mut received = Vec::new();
    while let Some(chunk) = rx.recv().await {
        assert!(chunk.len() <= config.chunk_size);
        received.extend_from_slice(&chunk);
    }

    assert_eq!(received, payload);
    assert_eq!(handle.await.unwrap().unwrap(), payload.len() as u64);
    assert_eq!(endpoint.state(), ConnectionState::Broken);
}

#[tokio::test]
async fn test_feed_writes_then_signals_end_of_stream() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let endpoint =
        PipeEndpoint::open_with(config.options("video-in", PipeDirection::Outbound)).unwrap();

    let mut child = pipe::OpenOptions::new()
        .open_receiver(endpoint.os_path())
        .unwrap();

    let (tx, rx) = mpsc::channel(4);
    let handle = feed(endpoint.clone(), rx);
    tx.send(b"moov".to_vec()).await.unwrap();
    tx.send(b"mdat".to_vec()).await.unwrap();
    drop(tx);

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), child.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received, b"moovmdat");
    assert_eq!(handle.await.unwrap().unwrap(), 8);
}

#[tokio::test]
async fn test_close_stops_pending_drain() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let endpoint =
        PipeEndpoint::open_with(config.options("stalled", PipeDirection::Inbound)).unwrap();

    let (_rx, handle) = drain(endpoint.clone(), config.chunk_size, config.channel_capacity);
    // The child opens its end but never writes
    let _child = open_child_sender(&endpoint).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(endpoint.state(), ConnectionState::Connecting);
    endpoint.close();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_copy_to_reports_downstream_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let endpoint =
        PipeEndpoint::open_with(config.options("relay", PipeDirection::Inbound)).unwrap();
    let reading = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { endpoint.readable().await })
    };

    let mut child = open_child_sender(&endpoint).await;
    child.write_all(b"segment").await.unwrap();
    drop(child);
    let mut reader = reading.await.unwrap().unwrap();

    // The HTTP client hung up: its half of the duplex is gone
    let (mut client, server) = tokio::io::duplex(64);
    drop(server);

    let err = reader.copy_to(&mut client).await.unwrap_err();
    assert!(matches!(err, mediarelay_pipe::PipeError::Downstream { .. }));
}
