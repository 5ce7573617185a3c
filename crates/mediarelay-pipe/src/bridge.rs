//! Background tasks moving bytes between a pipe and a channel
//!
//! `drain` pulls an inbound pipe into an mpsc channel so a request handler can
//! forward transcoder output without touching the pipe itself. `feed` is the
//! reverse for outbound pipes.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::endpoint::PipeEndpoint;
use crate::error::Result;

/// Read `endpoint` to end of stream, sending chunks of at most `chunk_size` bytes
///
/// The task finishes early without error once the receiver is dropped. Its
/// result is the number of bytes delivered.
pub fn drain(
    endpoint: PipeEndpoint,
    chunk_size: usize,
    capacity: usize,
) -> (mpsc::Receiver<Vec<u8>>, JoinHandle<Result<u64>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let chunk_size = chunk_size.max(1);

    let handle = tokio::spawn(async move {
        let mut reader = endpoint.readable().await?;
        let mut buf = vec![0u8; chunk_size];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                debug!(pipe = %endpoint.name(), bytes = total, "Pipe drained");
                return Ok(total);
            }
            if tx.send(buf[..n].to_vec()).await.is_err() {
                trace!(pipe = %endpoint.name(), "Drain consumer went away");
                return Ok(total);
            }
            total += n as u64;
        }
    });

    (rx, handle)
}

/// Write every chunk from `rx` into `endpoint`, then release it
///
/// The child sees end of stream once all senders are dropped.
pub fn feed(endpoint: PipeEndpoint, mut rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let mut writer = endpoint.writable().await?;
        let mut total = 0u64;
        while let Some(chunk) = rx.recv().await {
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        writer.finish().await?;
        debug!(pipe = %endpoint.name(), bytes = total, "Pipe fed");
        Ok(total)
    })
}
