//! Named-pipe endpoints for exchanging media streams with child processes
//!
//! A [`PipeEndpoint`] is created by the server, handed to a transcoder by its
//! [`os_path`](PipeEndpoint::os_path), and connected once the child opens its
//! end. Peer disconnects move the endpoint to [`ConnectionState::Broken`] and
//! are reported to the owner as a [`PipeHint`].
//!
//! ```no_run
//! use mediarelay_pipe::{PipeDirection, PipeEndpoint};
//!
//! # async fn example() -> mediarelay_pipe::Result<()> {
//! let pipe = PipeEndpoint::open("video-out", PipeDirection::Inbound, false)?;
//! // spawn the transcoder writing to pipe.os_path() ...
//! let mut reader = pipe.readable().await?;
//! let mut bytes = Vec::new();
//! reader.read_to_end(&mut bytes).await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod stream;

mod sys;

pub use bridge::{drain, feed};
pub use config::PipeConfig;
pub use endpoint::{ConnectionState, HintKind, PipeDirection, PipeEndpoint, PipeHint, PipeOptions};
pub use error::{PipeCreationError, PipeError, Result};
pub use stream::{PipeReader, PipeWriter};
