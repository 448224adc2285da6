//! LSP method payloads: request params builders and per-method result shapes.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::LspError;
use crate::types::{CompletionItem, Diagnostic, DiagnosticSeverity, Location, Range};

pub(crate) const INITIALIZE: &str = "initialize";
pub(crate) const INITIALIZED: &str = "initialized";
pub(crate) const SHUTDOWN: &str = "shutdown";
pub(crate) const EXIT: &str = "exit";
pub(crate) const DID_OPEN: &str = "textDocument/didOpen";
pub(crate) const DID_CHANGE: &str = "textDocument/didChange";
pub(crate) const DID_CLOSE: &str = "textDocument/didClose";
pub(crate) const COMPLETION: &str = "textDocument/completion";
pub(crate) const DEFINITION: &str = "textDocument/definition";
pub(crate) const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

/// `CompletionTriggerKind.Invoked`.
const TRIGGER_INVOKED: u8 = 1;

/// The fixed capability set: completion, definition, and diagnostics.
pub(crate) fn initialize_params(root_uri: &str) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "completion": {
                    "completionItem": {
                        "snippetSupport": false
                    }
                },
                "definition": {
                    "linkSupport": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            },
            "workspace": {
                "workspaceFolders": true
            }
        },
        "trace": "off",
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

/// Full-document sync: one content change carrying the whole text.
pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

pub(crate) fn position_params(uri: &str, line: u32, character: u32) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn completion_params(uri: &str, line: u32, character: u32) -> Value {
    let mut params = position_params(uri, line, character);
    params["context"] = serde_json::json!({ "triggerKind": TRIGGER_INVOKED });
    params
}

/// The three legal shapes of a `textDocument/completion` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResponse {
    /// `null` or absent.
    Empty,
    /// A bare `CompletionItem[]`.
    List(Vec<CompletionItem>),
    /// A `CompletionList` object.
    Wrapped {
        items: Vec<CompletionItem>,
        is_incomplete: bool,
    },
}

impl CompletionResponse {
    /// Items that fail to decode are skipped.
    pub fn from_result(result: Option<Value>) -> Result<Self, LspError> {
        match result {
            None | Some(Value::Null) => Ok(Self::Empty),
            Some(Value::Array(raw)) => Ok(Self::List(decode_items(raw))),
            Some(Value::Object(mut object)) => {
                let items = match object.remove("items") {
                    Some(Value::Array(raw)) => decode_items(raw),
                    _ => Vec::new(),
                };
                let is_incomplete = object
                    .get("isIncomplete")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Self::Wrapped {
                    items,
                    is_incomplete,
                })
            }
            Some(other) => Err(LspError::Decode(format!(
                "unexpected completion result: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn into_items(self) -> Vec<CompletionItem> {
        match self {
            Self::Empty => Vec::new(),
            Self::List(items) | Self::Wrapped { items, .. } => items,
        }
    }
}

fn decode_items(raw: Vec<Value>) -> Vec<CompletionItem> {
    raw.into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!("Skipping undecodable completion item: {e}");
                None
            }
        })
        .collect()
}

/// `LocationLink`, normalized to a [`Location`] on its selection range.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationLink {
    target_uri: String,
    target_selection_range: Range,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnyLocation {
    Location(Location),
    Link(LocationLink),
}

impl From<AnyLocation> for Location {
    fn from(any: AnyLocation) -> Self {
        match any {
            AnyLocation::Location(location) => location,
            AnyLocation::Link(link) => Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            },
        }
    }
}

/// The three legal shapes of a `textDocument/definition` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionResponse {
    None,
    Single(Location),
    Many(Vec<Location>),
}

impl DefinitionResponse {
    pub fn from_result(result: Option<Value>) -> Result<Self, LspError> {
        match result {
            None | Some(Value::Null) => Ok(Self::None),
            Some(Value::Array(raw)) => raw
                .into_iter()
                .map(decode_location)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Many),
            Some(value @ Value::Object(_)) => decode_location(value).map(Self::Single),
            Some(other) => Err(LspError::Decode(format!(
                "unexpected definition result: {other}"
            ))),
        }
    }

    /// The single location, or the first of many.
    #[must_use]
    pub fn first(self) -> Option<Location> {
        match self {
            Self::None => None,
            Self::Single(location) => Some(location),
            Self::Many(locations) => locations.into_iter().next(),
        }
    }
}

fn decode_location(value: Value) -> Result<Location, LspError> {
    serde_json::from_value::<AnyLocation>(value)
        .map(Location::from)
        .map_err(|e| LspError::Decode(format!("invalid location: {e}")))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.range,
            self.message,
            self.source.unwrap_or_else(|| String::from("unknown")),
        )
    }
}

/// Render a path as a `file://` document identifier.
///
/// Relative paths are resolved against the current directory first.
pub(crate) fn path_to_file_uri(path: &Path) -> Result<String, LspError> {
    let absolute = std::path::absolute(path).map_err(|e| LspError::InvalidPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    url::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| LspError::InvalidPath {
            reason: String::from("not representable as a file URI"),
            path: absolute,
        })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
