//! Stream views over a connected pipe endpoint

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::endpoint::{HintKind, PipeEndpoint};
use crate::error::{PipeError, Result};
use crate::sys::{BoxedReader, BoxedWriter};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Reading half of an inbound pipe
///
/// `read` returns `Ok(0)` at end of stream. A concurrent
/// [`PipeEndpoint::close`] makes any pending read return [`PipeError::Closed`].
pub struct PipeReader {
    endpoint: PipeEndpoint,
    stream: BoxedReader,
    eof: bool,
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("endpoint", &self.endpoint)
            .field("eof", &self.eof)
            .finish()
    }
}

impl PipeReader {
    pub(crate) fn new(endpoint: PipeEndpoint, stream: BoxedReader) -> Self {
        Self {
            endpoint,
            stream,
            eof: false,
        }
    }

    /// The endpoint this reader belongs to
    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    /// Read into `buf`, returning the number of bytes read (0 at end of stream)
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.endpoint.is_closed() {
            return Err(self.endpoint.closed_error());
        }
        // A zero-length read says nothing about the peer
        if buf.is_empty() {
            return Ok(0);
        }

        let closed = self.endpoint.closed_token().clone();
        let outcome = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            result = self.stream.read(buf) => Some(result),
        };

        match outcome {
            None => Err(self.endpoint.closed_error()),
            Some(Ok(0)) => {
                self.end_of_stream();
                Ok(0)
            }
            Some(Ok(n)) => Ok(n),
            // Windows reports a writer that went away as ERROR_BROKEN_PIPE
            Some(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.end_of_stream();
                Ok(0)
            }
            Some(Err(e)) => Err(self.endpoint.io_error(e)),
        }
    }

    /// Read until end of stream, appending to `out`
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// Stream everything to `dst` until end of stream
    ///
    /// Failures writing to `dst` are reported as [`PipeError::Downstream`] so the
    /// caller can tell a client disconnect from a pipe failure.
    pub async fn copy_to<W>(&mut self, dst: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                dst.flush().await.map_err(|e| self.downstream(e))?;
                return Ok(total);
            }
            dst.write_all(&buf[..n])
                .await
                .map_err(|e| self.downstream(e))?;
            total += n as u64;
        }
    }

    fn end_of_stream(&mut self) {
        self.eof = true;
        self.endpoint.release_connection(Some(HintKind::EndOfStream));
    }

    fn downstream(&self, source: io::Error) -> PipeError {
        PipeError::Downstream {
            name: self.endpoint.name().to_string(),
            source,
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.endpoint.release_connection(None);
    }
}

/// Writing half of an outbound pipe
///
/// Writing after the child closed its end fails with [`PipeError::BrokenPipe`].
pub struct PipeWriter {
    endpoint: PipeEndpoint,
    stream: BoxedWriter,
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl PipeWriter {
    pub(crate) fn new(endpoint: PipeEndpoint, stream: BoxedWriter) -> Self {
        Self { endpoint, stream }
    }

    /// The endpoint this writer belongs to
    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    /// Write the whole buffer
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.endpoint.is_closed() {
            return Err(self.endpoint.closed_error());
        }

        let closed = self.endpoint.closed_token().clone();
        let outcome = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            result = self.stream.write_all(data) => Some(result),
        };

        match outcome {
            None => Err(self.endpoint.closed_error()),
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(self.write_error(e)),
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        let closed = self.endpoint.closed_token().clone();
        let outcome = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            result = self.stream.flush() => Some(result),
        };

        match outcome {
            None => Err(self.endpoint.closed_error()),
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(self.write_error(e)),
        }
    }

    /// Stream everything from `src` into the pipe
    pub async fn copy_from<R>(&mut self, src: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = src.read(&mut buf).await.map_err(|e| PipeError::Downstream {
                name: self.endpoint.name().to_string(),
                source: e,
            })?;
            if n == 0 {
                self.flush().await?;
                return Ok(total);
            }
            self.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Flush and release the connection so the child sees end of stream
    pub async fn finish(mut self) -> Result<()> {
        self.flush().await
    }

    fn write_error(&self, e: io::Error) -> PipeError {
        if e.kind() == io::ErrorKind::BrokenPipe {
            self.endpoint
                .release_connection(Some(HintKind::BrokenPipe));
            self.endpoint.broken_error()
        } else {
            self.endpoint.io_error(e)
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.endpoint.release_connection(None);
    }
}
