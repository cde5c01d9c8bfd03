//! Error types for the evaluation pipeline.

use std::{io, net::SocketAddr};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An accessor that needs a finished evaluation was called too early.
    #[error("cannot call {0} on engine until it has evaluated the program")]
    MustEvaluateFirst(&'static str),

    #[error("failed to listen for events on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn interpreter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
