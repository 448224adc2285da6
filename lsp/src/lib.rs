//! Language Server Protocol client for the editor.
//!
//! Spawns one language server, correlates requests with responses over
//! stdio, and keeps the diagnostics the server publishes.

pub mod codec;
pub mod message;
pub mod types;

mod client;
mod connection;
mod diagnostics;
mod error;
mod language;
mod process;
mod protocol;

pub use client::LspClient;
pub use error::{FramingError, LspError};
pub use language::{LanguageTable, PLAINTEXT};
pub use protocol::{CompletionResponse, DefinitionResponse};
pub use types::{
    CompletionItem, Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, Documentation, Lifecycle,
    Location, LspConfig, LspEvent, Position, Range, ServerConfig, ServerStopReason,
};

/// Render `path` as the `file://` URI the server uses to identify it.
pub fn document_uri(path: &std::path::Path) -> Result<String, LspError> {
    protocol::path_to_file_uri(path)
}
