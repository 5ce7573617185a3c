//! Named pipe endpoint with create/connect/reconnect semantics

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{PipeCreationError, PipeError, Result};
use crate::stream::{PipeReader, PipeWriter};
use crate::sys::{Connection, OsPipe};

const MAX_NAME_LEN: usize = 200;

/// Direction of data flow, seen from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeDirection {
    /// The child writes, the server reads
    Inbound,
    /// The server writes, the child reads
    Outbound,
}

impl fmt::Display for PipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeDirection::Inbound => write!(f, "inbound"),
            PipeDirection::Outbound => write!(f, "outbound"),
        }
    }
}

/// Connection state of an endpoint
///
/// `Broken` and `Closed` are sticky: only an explicit [`PipeEndpoint::reconnect`]
/// moves a broken endpoint back to `Created`, and nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Created,
    Connecting,
    Connected,
    Broken,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Created => "created",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Broken => "broken",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What an I/O task observed about the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    /// The child closed its write end
    EndOfStream,
    /// The child closed its read end while we were writing
    BrokenPipe,
}

/// Sent to the owning process manager when the peer goes away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeHint {
    /// Opaque owner tag (the process id the pipe belongs to)
    pub owner: u64,
    /// Pipe name
    pub pipe: String,
    pub kind: HintKind,
}

/// Options for [`PipeEndpoint::open_with`]
#[derive(Debug, Clone)]
pub struct PipeOptions {
    name: String,
    direction: PipeDirection,
    reconnect_allowed: bool,
    directory: Option<PathBuf>,
    poll_interval: Duration,
    owner: Option<(u64, mpsc::UnboundedSender<PipeHint>)>,
}

impl PipeOptions {
    /// Options for a pipe named `name`
    pub fn new(name: impl Into<String>, direction: PipeDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            reconnect_allowed: false,
            directory: None,
            poll_interval: Duration::from_millis(20),
            owner: None,
        }
    }

    /// Allow explicit reconnects after the peer disconnects
    pub fn reconnect(mut self, allowed: bool) -> Self {
        self.reconnect_allowed = allowed;
        self
    }

    /// Directory holding FIFOs (ignored on Windows)
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    /// How often to retry opening the write end while no reader exists
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Tag the endpoint with its owner and where to send peer hints
    pub fn owner(mut self, owner: u64, hints: mpsc::UnboundedSender<PipeHint>) -> Self {
        self.owner = Some((owner, hints));
        self
    }
}

struct Inner {
    name: String,
    direction: PipeDirection,
    reconnect_allowed: bool,
    poll_interval: Duration,
    os_path: PathBuf,
    os: Mutex<OsPipe>,
    state: watch::Sender<ConnectionState>,
    closed: CancellationToken,
    owner: Option<u64>,
    hints: Option<mpsc::UnboundedSender<PipeHint>>,
}

/// A named, OS-backed byte channel between the server and a child process
///
/// Cloning yields another handle to the same endpoint. The OS object is removed
/// on [`close`](Self::close) or when the last handle is dropped.
#[derive(Clone)]
pub struct PipeEndpoint {
    inner: Arc<Inner>,
}

impl fmt::Debug for PipeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeEndpoint")
            .field("name", &self.inner.name)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .field("reconnect_allowed", &self.inner.reconnect_allowed)
            .field("owner", &self.inner.owner)
            .finish()
    }
}

impl PipeEndpoint {
    /// Create a pipe in the default location
    pub fn open(
        name: impl Into<String>,
        direction: PipeDirection,
        reconnect_allowed: bool,
    ) -> Result<Self> {
        Self::open_with(PipeOptions::new(name, direction).reconnect(reconnect_allowed))
    }

    /// Create a pipe from explicit options
    pub fn open_with(options: PipeOptions) -> Result<Self> {
        let PipeOptions {
            name,
            direction,
            reconnect_allowed,
            directory,
            poll_interval,
            owner,
        } = options;

        validate_name(&name)?;
        let directory = directory.unwrap_or_else(std::env::temp_dir);
        let os = OsPipe::create(&name, &directory, direction)?;
        let os_path = os.os_path().to_path_buf();
        let (state, _) = watch::channel(ConnectionState::Created);
        let (owner, hints) = match owner {
            Some((owner, hints)) => (Some(owner), Some(hints)),
            None => (None, None),
        };

        debug!(
            pipe = %name,
            direction = %direction,
            reconnect_allowed,
            path = %os_path.display(),
            "Opened pipe endpoint"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                direction,
                reconnect_allowed,
                poll_interval,
                os_path,
                os: Mutex::new(os),
                state,
                closed: CancellationToken::new(),
                owner,
                hints,
            }),
        })
    }

    /// Pipe name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Data direction
    pub fn direction(&self) -> PipeDirection {
        self.inner.direction
    }

    /// Whether explicit reconnects are permitted
    pub fn reconnect_allowed(&self) -> bool {
        self.inner.reconnect_allowed
    }

    /// Owner tag, if any
    pub fn owner(&self) -> Option<u64> {
        self.inner.owner
    }

    /// Path the child process opens (FIFO path or `\\.\pipe\` name)
    pub fn os_path(&self) -> &Path {
        &self.inner.os_path
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether two handles refer to the same endpoint
    pub fn same_endpoint(&self, other: &PipeEndpoint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait for the child and return a reader (inbound pipes only)
    pub async fn readable(&self) -> Result<PipeReader> {
        match self.connect(PipeDirection::Inbound).await? {
            Connection::Reader(stream) => Ok(PipeReader::new(self.clone(), stream)),
            Connection::Writer(_) => Err(self.wrong_direction(PipeDirection::Inbound)),
        }
    }

    /// Wait for the child and return a writer (outbound pipes only)
    pub async fn writable(&self) -> Result<PipeWriter> {
        match self.connect(PipeDirection::Outbound).await? {
            Connection::Writer(stream) => Ok(PipeWriter::new(self.clone(), stream)),
            Connection::Reader(_) => Err(self.wrong_direction(PipeDirection::Outbound)),
        }
    }

    /// Move a broken endpoint back to `Created` so it can be connected again
    pub fn reconnect(&self) -> Result<()> {
        if !self.inner.reconnect_allowed {
            return Err(PipeError::ReconnectNotAllowed {
                name: self.inner.name.clone(),
            });
        }
        let mut current = None;
        let reset = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Broken {
                *state = ConnectionState::Created;
                true
            } else {
                current = Some(*state);
                false
            }
        });
        if reset {
            debug!(pipe = %self.inner.name, "Pipe endpoint reset for reconnect");
            return Ok(());
        }
        match current {
            Some(ConnectionState::Closed) => Err(self.closed_error()),
            Some(state) => Err(PipeError::InvalidState {
                name: self.inner.name.clone(),
                state,
            }),
            None => Ok(()),
        }
    }

    /// Close the endpoint and remove its OS object
    ///
    /// Idempotent. Pending connects, reads and writes complete with `Closed`.
    pub fn close(&self) {
        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        if previous == ConnectionState::Closed {
            return;
        }
        self.inner.closed.cancel();
        self.inner.os.lock().remove();
        debug!(pipe = %self.inner.name, previous = %previous, "Closed pipe endpoint");
    }

    /// Resolves once the endpoint has been closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    async fn connect(&self, requested: PipeDirection) -> Result<Connection> {
        if requested != self.inner.direction {
            return Err(self.wrong_direction(requested));
        }

        let mut refused = None;
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Created {
                *state = ConnectionState::Connecting;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        match refused {
            Some(ConnectionState::Closed) => return Err(self.closed_error()),
            Some(state) => {
                return Err(PipeError::InvalidState {
                    name: self.inner.name.clone(),
                    state,
                })
            }
            None => {}
        }

        // Puts the state back to `Created` if this future is dropped mid-connect
        let mut guard = ConnectGuard {
            endpoint: self,
            armed: true,
        };

        let pending = self
            .inner
            .os
            .lock()
            .prepare(self.inner.direction, self.inner.poll_interval)
            .map_err(|e| self.io_error(e))?;

        trace!(pipe = %self.inner.name, "Waiting for child to open pipe");
        let closed = self.inner.closed.clone();
        let outcome = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            result = pending.connect() => Some(result),
        };
        let connection = match outcome {
            None => return Err(self.closed_error()),
            Some(result) => result.map_err(|e| self.io_error(e))?,
        };

        guard.armed = false;
        let connected = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !connected {
            // Closed while the connect was completing
            return Err(self.closed_error());
        }

        debug!(pipe = %self.inner.name, direction = %self.inner.direction, "Pipe connected");
        Ok(connection)
    }

    /// Give up the current connection; `hint` is forwarded to the owner
    pub(crate) fn release_connection(&self, hint: Option<HintKind>) {
        let released = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Broken;
                true
            } else {
                false
            }
        });
        if !released {
            return;
        }

        if !self.inner.reconnect_allowed {
            // Never reused, so a later open with the same name gets a fresh object
            self.inner.os.lock().remove();
        }

        if let Some(kind) = hint {
            debug!(pipe = %self.inner.name, kind = ?kind, "Pipe peer went away");
            self.send_hint(kind);
        }
    }

    fn send_hint(&self, kind: HintKind) {
        if let (Some(owner), Some(hints)) = (self.inner.owner, &self.inner.hints) {
            let hint = PipeHint {
                owner,
                pipe: self.inner.name.clone(),
                kind,
            };
            if hints.send(hint).is_err() {
                trace!(pipe = %self.inner.name, "Hint receiver is gone");
            }
        }
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.inner.closed
    }

    pub(crate) fn closed_error(&self) -> PipeError {
        PipeError::Closed {
            name: self.inner.name.clone(),
        }
    }

    pub(crate) fn broken_error(&self) -> PipeError {
        PipeError::BrokenPipe {
            name: self.inner.name.clone(),
        }
    }

    pub(crate) fn io_error(&self, source: io::Error) -> PipeError {
        PipeError::Io {
            name: self.inner.name.clone(),
            source,
        }
    }

    fn wrong_direction(&self, requested: PipeDirection) -> PipeError {
        PipeError::WrongDirection {
            name: self.inner.name.clone(),
            direction: self.inner.direction,
            requested,
        }
    }
}

struct ConnectGuard<'a> {
    endpoint: &'a PipeEndpoint,
    armed: bool,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.endpoint.inner.state.send_if_modified(|state| {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Created;
                    true
                } else {
                    false
                }
            });
        }
    }
}

fn validate_name(name: &str) -> std::result::Result<(), PipeCreationError> {
    let invalid = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(PipeCreationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
