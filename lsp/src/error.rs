//! Error types for the protocol client.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::Lifecycle;

/// Errors raised while reading a frame off the wire.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Content-Length {length} exceeds maximum {max}")]
    FrameTooLarge { length: usize, max: usize },

    #[error("unexpected EOF inside a frame")]
    UnexpectedEof,

    #[error("I/O error while reading frame: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// Whether the stream is unusable after this error.
    ///
    /// Header errors leave the reader at the next frame boundary; I/O
    /// failures and truncated frames do not.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnexpectedEof | Self::Io(_))
    }
}

/// Errors returned by the protocol client's public operations.
#[derive(Debug, Error)]
pub enum LspError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Working directory resolution, command lookup, pipe creation, or spawn failed.
    #[error("failed to start language server: {context}")]
    Start {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The initialize request failed or the server answered it with an error.
    #[error("initialize handshake failed: {0}")]
    Handshake(String),

    #[error("`{operation}` is not allowed while the client is {state}")]
    NotReady {
        operation: &'static str,
        state: Lifecycle,
    },

    /// Writing a frame to the server failed.
    #[error("failed to write `{method}` to the language server")]
    Transport {
        method: String,
        #[source]
        source: io::Error,
    },

    /// A document path could not be rendered as a `file://` URI.
    #[error("invalid document path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The server answered a request with a JSON-RPC error.
    #[error("language server returned error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("failed to serialize message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no pending request with id {0}")]
    UnknownRequest(u64),

    /// The connection was shut down or the server went away.
    #[error("request cancelled: language server connection closed")]
    Cancelled,
}

impl LspError {
    pub(crate) fn start(context: impl Into<String>, source: io::Error) -> Self {
        Self::Start {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
