//! Named pipes in the `\\.\pipe\` namespace

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tracing::{debug, trace};

use super::Connection;
use crate::endpoint::PipeDirection;
use crate::error::PipeCreationError;

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_NOT_ENOUGH_MEMORY: i32 = 8;
const ERROR_OUTOFMEMORY: i32 = 14;
const ERROR_INVALID_NAME: i32 = 123;
const ERROR_PIPE_BUSY: i32 = 231;

/// The server side of a named pipe; the child opens it as a client
#[derive(Debug)]
pub(crate) struct OsPipe {
    name: String,
    path: PathBuf,
    direction: PipeDirection,
    server: Option<NamedPipeServer>,
    removed: bool,
}

impl OsPipe {
    pub(crate) fn create(
        name: &str,
        _directory: &Path,
        direction: PipeDirection,
    ) -> Result<Self, PipeCreationError> {
        let path = format!(r"\\.\pipe\{}", name);
        let server = server_options(direction, true)
            .create(&path)
            .map_err(|e| classify(name, e))?;
        debug!(pipe = %path, "Created named pipe");
        Ok(Self {
            name: name.to_string(),
            path: PathBuf::from(path),
            direction,
            server: Some(server),
            removed: false,
        })
    }

    /// The pipe path handed to the child process
    pub(crate) fn os_path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn prepare(
        &mut self,
        direction: PipeDirection,
        _poll_interval: Duration,
    ) -> io::Result<PendingConnect> {
        if self.removed {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "named pipe has already been removed",
            ));
        }
        // A reconnect needs a fresh instance; the previous one lives in the old stream.
        let server = match self.server.take() {
            Some(server) => server,
            None => server_options(self.direction, false)
                .create(&self.path)
                .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", self.name, e)))?,
        };
        Ok(PendingConnect { server, direction })
    }

    pub(crate) fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        self.server = None;
        debug!(pipe = %self.path.display(), "Released named pipe");
    }
}

pub(crate) struct PendingConnect {
    server: NamedPipeServer,
    direction: PipeDirection,
}

impl PendingConnect {
    pub(crate) async fn connect(self) -> io::Result<Connection> {
        self.server.connect().await?;
        trace!("Client connected to named pipe");
        Ok(match self.direction {
            PipeDirection::Inbound => Connection::Reader(Box::new(self.server)),
            PipeDirection::Outbound => Connection::Writer(Box::new(self.server)),
        })
    }
}

fn server_options(direction: PipeDirection, first_instance: bool) -> ServerOptions {
    let mut options = ServerOptions::new();
    options
        .first_pipe_instance(first_instance)
        .access_inbound(direction == PipeDirection::Inbound)
        .access_outbound(direction == PipeDirection::Outbound);
    options
}

fn classify(name: &str, err: io::Error) -> PipeCreationError {
    let name = name.to_string();
    match err.raw_os_error() {
        // With FILE_FLAG_FIRST_PIPE_INSTANCE, an existing instance shows up as access denied
        Some(ERROR_ACCESS_DENIED) | Some(ERROR_PIPE_BUSY) => PipeCreationError::Collision { name },
        Some(ERROR_INVALID_NAME) => PipeCreationError::InvalidName { name },
        Some(ERROR_NOT_ENOUGH_MEMORY) | Some(ERROR_OUTOFMEMORY) => {
            PipeCreationError::ResourceExhausted { name, source: err }
        }
        _ if err.kind() == io::ErrorKind::PermissionDenied => {
            PipeCreationError::PermissionDenied { name, source: err }
        }
        _ => PipeCreationError::Io { name, source: err },
    }
}
