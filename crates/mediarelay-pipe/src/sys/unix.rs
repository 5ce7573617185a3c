//! FIFO-backed pipes

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::net::unix::pipe;
use tracing::{debug, trace, warn};

use super::Connection;
use crate::endpoint::PipeDirection;
use crate::error::PipeCreationError;

/// A FIFO special file in the pipe directory
#[derive(Debug)]
pub(crate) struct OsPipe {
    path: PathBuf,
    removed: bool,
}

impl OsPipe {
    pub(crate) fn create(
        name: &str,
        directory: &Path,
        _direction: PipeDirection,
    ) -> Result<Self, PipeCreationError> {
        let path = directory.join(name);
        match mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) => {
                debug!(path = %path.display(), "Created FIFO");
                Ok(Self {
                    path,
                    removed: false,
                })
            }
            Err(errno) => Err(classify(name, errno)),
        }
    }

    /// The path handed to the child process
    pub(crate) fn os_path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn prepare(
        &mut self,
        direction: PipeDirection,
        poll_interval: Duration,
    ) -> io::Result<PendingConnect> {
        if self.removed {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "FIFO has already been removed",
            ));
        }
        Ok(PendingConnect {
            path: self.path.clone(),
            direction,
            poll_interval,
        })
    }

    pub(crate) fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed FIFO"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove FIFO"),
        }
    }
}

impl Drop for OsPipe {
    fn drop(&mut self) {
        self.remove();
    }
}

pub(crate) struct PendingConnect {
    path: PathBuf,
    direction: PipeDirection,
    poll_interval: Duration,
}

impl PendingConnect {
    /// Open our end of the FIFO without ever blocking a thread.
    ///
    /// The read end opens immediately but a read before any writer appeared
    /// would report end of stream, so connect waits for the first readiness
    /// event: data or a writer that came and went. The write end fails with
    /// `ENXIO` until a reader exists, so it is polled.
    pub(crate) async fn connect(self) -> io::Result<Connection> {
        match self.direction {
            PipeDirection::Inbound => {
                let receiver = pipe::OpenOptions::new().open_receiver(&self.path)?;
                trace!(path = %self.path.display(), "Opened FIFO read end");
                receiver.readable().await?;
                Ok(Connection::Reader(Box::new(receiver)))
            }
            PipeDirection::Outbound => loop {
                match pipe::OpenOptions::new().open_sender(&self.path) {
                    Ok(sender) => {
                        trace!(path = %self.path.display(), "Opened FIFO write end");
                        return Ok(Connection::Writer(Box::new(sender)));
                    }
                    Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) => return Err(e),
                }
            },
        }
    }
}

fn classify(name: &str, errno: Errno) -> PipeCreationError {
    let name = name.to_string();
    match errno {
        Errno::EEXIST => PipeCreationError::Collision { name },
        Errno::EACCES | Errno::EPERM | Errno::EROFS => PipeCreationError::PermissionDenied {
            name,
            source: errno.into(),
        },
        Errno::ENOSPC | Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM | Errno::EDQUOT => {
            PipeCreationError::ResourceExhausted {
                name,
                source: errno.into(),
            }
        }
        Errno::ENAMETOOLONG => PipeCreationError::InvalidName { name },
        _ => PipeCreationError::Io {
            name,
            source: errno.into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let mut fifo = OsPipe::create("video0", dir.path(), PipeDirection::Inbound).unwrap();
        let path = fifo.os_path().to_path_buf();

        use std::os::unix::fs::FileTypeExt;
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());

        fifo.remove();
        assert!(!path.exists());
        // Second remove is a no-op
        fifo.remove();
    }

    #[test]
    fn test_create_collision() {
        let dir = tempfile::tempdir().unwrap();
        let _first = OsPipe::create("audio", dir.path(), PipeDirection::Inbound).unwrap();
        let second = OsPipe::create("audio", dir.path(), PipeDirection::Inbound);
        assert!(matches!(second, Err(PipeCreationError::Collision { .. })));
    }

    #[test]
    fn test_create_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let result = OsPipe::create("x", &missing, PipeDirection::Outbound);
        assert!(matches!(result, Err(PipeCreationError::Io { .. })));
    }
}
