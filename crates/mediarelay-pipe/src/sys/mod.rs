//! OS objects backing pipe endpoints
//!
//! Each platform provides an `OsPipe` (the named rendezvous object) and a
//! `PendingConnect` that resolves once the child process has opened its end.

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{OsPipe, PendingConnect};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{OsPipe, PendingConnect};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected stream, typed by the direction the server uses it in
pub(crate) enum Connection {
    Reader(BoxedReader),
    Writer(BoxedWriter),
}
