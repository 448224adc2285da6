//! Public types consumed by the editor.
//!
//! These types define the interface between `tron-lsp` and the editor UI.
//! The editor constructs [`LspConfig`], receives [`LspEvent`]s, and reads
//! [`Diagnostic`]s and [`DiagnosticsSnapshot`]s for display.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

const fn default_grace_ms() -> u64 {
    2000
}

/// Configuration for the language intelligence subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LspConfig {
    /// Whether the client is enabled. Default: false.
    #[serde(default)]
    pub enabled: bool,
    /// The language server to drive.
    #[serde(default)]
    pub server: Option<ServerConfig>,
    /// Extension → language identifier overrides (e.g. `{"pyi": "python"}`).
    #[serde(default)]
    pub languages: HashMap<String, String>,
}

/// Configuration for a single language server process.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command (e.g. "pyright-langserver").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// How long `stop()` waits after the interrupt before killing. Default: 2000.
    #[serde(default = "default_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            shutdown_grace_ms: default_grace_ms(),
        }
    }
}

/// Client lifecycle: `Uninitialized → Initializing → Ready → ShuttingDown → Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Terminated,
}

impl Lifecycle {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Zero-based position in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A location inside a document, as returned by go-to-definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    /// The location's document as a filesystem path, if it is a `file://` URI.
    #[must_use]
    pub fn path(&self) -> Option<std::path::PathBuf> {
        crate::protocol::file_uri_to_path(&self.uri)
    }
}

/// Completion documentation: either a plain string or `MarkupContent`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Documentation {
    Plain(String),
    Markup { kind: String, value: String },
}

impl Documentation {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Markup { value: text, .. } => text,
        }
    }
}

/// A single completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default)]
    pub kind: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub documentation: Option<Documentation>,
    #[serde(default)]
    pub insert_text: Option<String>,
    #[serde(default)]
    pub sort_text: Option<String>,
    #[serde(default)]
    pub filter_text: Option<String>,
}

impl CompletionItem {
    /// Text to insert when the item is accepted.
    #[must_use]
    pub fn text_to_insert(&self) -> &str {
        self.insert_text.as_deref().unwrap_or(&self.label)
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by the language server.
///
/// Fields are private; construction happens at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    range: Range,
    message: String,
    /// Resolved to "unknown" when the server omits it.
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        range: Range,
        message: String,
        source: String,
    ) -> Self {
        Self {
            severity,
            range,
            message,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `path:line:col: severity: [source] message` (1-indexed for display).
    #[must_use]
    pub fn display_with_path(&self, path: &std::path::Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    /// The server closed its stdout.
    Exited,
    /// The stream became unreadable.
    Failed(String),
}

/// An event emitted by the protocol client.
#[derive(Debug, Clone)]
pub enum LspEvent {
    /// A document's diagnostics were replaced.
    Diagnostics { uri: String, items: Vec<Diagnostic> },
    /// The read loop ended; outstanding requests were cancelled.
    ServerStopped { reason: ServerStopReason },
}

/// Immutable snapshot of all diagnostics, suitable for UI rendering.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, sorted with error-containing documents first.
    documents: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(documents: Vec<(String, Vec<Diagnostic>)>) -> Self {
        Self { documents }
    }

    #[must_use]
    pub fn documents(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.documents
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.iter().all(|(_, items)| items.is_empty())
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.documents
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.documents.iter().map(|(_, items)| items.len()).sum()
    }

    /// Format a compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
