//! Diagnostics table and the server-notification dispatcher that feeds it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{self, PublishDiagnosticsParams};
use crate::types::{Diagnostic, DiagnosticsSnapshot, LspEvent};

/// Per-document diagnostics keyed by URI, shared between the reader and the UI.
///
/// Each publish replaces the document's entry wholesale.
#[derive(Debug, Clone, Default)]
pub(crate) struct DiagnosticsTable {
    data: Arc<RwLock<HashMap<String, Vec<Diagnostic>>>>,
}

impl DiagnosticsTable {
    pub fn replace(&self, uri: String, items: Vec<Diagnostic>) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, items);
    }

    pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self, uri: &str) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut documents: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        // Sort: documents with errors first, then by URI
        documents.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors.cmp(&a_has_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(documents)
    }
}

/// Routes server notifications to their handlers.
///
/// Runs on the reader task, so nothing here may await.
#[derive(Debug, Clone)]
pub(crate) struct NotificationDispatcher {
    diagnostics: DiagnosticsTable,
    events: Option<mpsc::Sender<LspEvent>>,
}

impl NotificationDispatcher {
    pub fn new(diagnostics: DiagnosticsTable, events: Option<mpsc::Sender<LspEvent>>) -> Self {
        Self {
            diagnostics,
            events,
        }
    }

    pub fn dispatch(&self, method: &str, params: Option<Value>) {
        match method {
            protocol::PUBLISH_DIAGNOSTICS => self.publish_diagnostics(params),
            _ => tracing::trace!(method, "Ignoring server notification"),
        }
    }

    /// Emit an event without waiting; dropped when the channel is full.
    pub fn emit(&self, event: LspEvent) {
        let Some(events) = &self.events else { return };
        if let Err(e) = events.try_send(event) {
            tracing::debug!("Dropping LSP event: {e}");
        }
    }

    fn publish_diagnostics(&self, params: Option<Value>) {
        let Some(params) = params else {
            tracing::debug!("publishDiagnostics without params");
            return;
        };
        let params = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!("Failed to parse publishDiagnostics: {e}");
                return;
            }
        };

        let items: Vec<Diagnostic> = params
            .diagnostics
            .into_iter()
            .map(protocol::LspDiagnostic::into_diagnostic)
            .collect();
        tracing::debug!(uri = %params.uri, count = items.len(), "Diagnostics updated");

        // Table first, so an event consumer always sees the new entry.
        self.diagnostics.replace(params.uri.clone(), items.clone());
        self.emit(LspEvent::Diagnostics {
            uri: params.uri,
            items,
        });
    }
}
