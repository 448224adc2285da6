//! `LspClient` facade: the public API consumed by the editor.
//!
//! The client is a small state machine over one connection:
//! `Uninitialized → Initializing → Ready → ShuttingDown → Terminated`.
//! Document and feature operations are only legal while `Ready`.

use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::diagnostics::{DiagnosticsTable, NotificationDispatcher};
use crate::error::LspError;
use crate::language::LanguageTable;
use crate::message::Response;
use crate::process::ServerProcess;
use crate::protocol::{self, CompletionResponse, DefinitionResponse};
use crate::types::{
    CompletionItem, Diagnostic, DiagnosticsSnapshot, Lifecycle, Location, LspEvent, ServerConfig,
};

const INITIAL_DOCUMENT_VERSION: i32 = 1;

/// Grace period for clients that were not built from a [`ServerConfig`].
const DEFAULT_GRACE: Duration = Duration::from_secs(2);

pub struct LspClient {
    server: Option<ServerConfig>,
    languages: LanguageTable,
    diagnostics: DiagnosticsTable,
    events: Option<mpsc::Sender<LspEvent>>,
    grace_period: Duration,
    lifecycle: RwLock<Lifecycle>,
    /// Set once the server is started or attached.
    connection: Option<Arc<Connection>>,
    process: tokio::sync::Mutex<ServerProcess>,
}

impl LspClient {
    /// A client that will spawn `server` on [`start`](Self::start).
    #[must_use]
    pub fn new(server: ServerConfig, languages: LanguageTable) -> Self {
        let grace_period = Duration::from_millis(server.shutdown_grace_ms);
        Self::build(Some(server), languages, grace_period)
    }

    /// A client with no server command, for use with [`attach`](Self::attach).
    #[must_use]
    pub fn in_memory(languages: LanguageTable) -> Self {
        Self::build(None, languages, DEFAULT_GRACE)
    }

    /// Build an in-memory client and attach it to `reader`/`writer` in one step.
    pub fn connect<R, W>(reader: R, writer: W, languages: LanguageTable) -> Result<Self, LspError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut client = Self::in_memory(languages);
        client.attach(reader, writer)?;
        Ok(client)
    }

    fn build(server: Option<ServerConfig>, languages: LanguageTable, grace_period: Duration) -> Self {
        Self {
            server,
            languages,
            diagnostics: DiagnosticsTable::default(),
            events: None,
            grace_period,
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
            connection: None,
            process: tokio::sync::Mutex::new(ServerProcess::new(grace_period)),
        }
    }

    /// Receive [`LspEvent`]s on `events`. Must be set before start/attach.
    #[must_use]
    pub fn with_event_sender(mut self, events: mpsc::Sender<LspEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawn the configured server in `working_dir`.
    pub fn start(&mut self, working_dir: &Path) -> Result<(), LspError> {
        let Some(server) = &self.server else {
            return Err(LspError::start(
                "no language server command configured",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        };
        let dispatcher = self.dispatcher();
        let connection = self
            .process
            .get_mut()
            .start(server, working_dir, dispatcher)?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Speak the protocol over caller-supplied streams.
    pub fn attach<R, W>(&mut self, reader: R, writer: W) -> Result<(), LspError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let dispatcher = self.dispatcher();
        let connection = self
            .process
            .get_mut()
            .attach(reader, Box::new(writer), dispatcher)?;
        self.connection = Some(connection);
        Ok(())
    }

    fn dispatcher(&self) -> NotificationDispatcher {
        NotificationDispatcher::new(self.diagnostics.clone(), self.events.clone())
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lifecycle() == Lifecycle::Ready
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Atomically move `from → to`, or report the current state.
    fn transition(&self, from: Lifecycle, to: Lifecycle) -> Result<(), Lifecycle> {
        let mut state = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(*state);
        }
        *state = to;
        Ok(())
    }

    fn require_ready(&self, operation: &'static str) -> Result<&Arc<Connection>, LspError> {
        let state = self.lifecycle();
        match &self.connection {
            Some(connection) if state == Lifecycle::Ready => Ok(connection),
            _ => Err(LspError::NotReady { operation, state }),
        }
    }

    /// Perform the `initialize`/`initialized` handshake rooted at `root`.
    ///
    /// On failure the client returns to `Uninitialized`.
    pub async fn initialize(&self, root: &Path) -> Result<(), LspError> {
        let operation = "initialize";
        let Some(connection) = &self.connection else {
            return Err(LspError::NotReady {
                operation,
                state: self.lifecycle(),
            });
        };
        self.transition(Lifecycle::Uninitialized, Lifecycle::Initializing)
            .map_err(|state| LspError::NotReady { operation, state })?;
        let _guard = InitializeGuard {
            lifecycle: &self.lifecycle,
        };

        match Self::handshake(connection, root).await {
            Ok(()) => {
                self.set_lifecycle(Lifecycle::Ready);
                tracing::info!(root = %root.display(), "Language server initialized");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Language server initialize failed: {e}");
                Err(e)
            }
        }
    }

    async fn handshake(connection: &Connection, root: &Path) -> Result<(), LspError> {
        let handshake_error = |e: LspError| LspError::Handshake(e.to_string());
        let root_uri = protocol::path_to_file_uri(root).map_err(handshake_error)?;

        let response = connection
            .request(
                protocol::INITIALIZE,
                Some(protocol::initialize_params(&root_uri)),
            )
            .await
            .map_err(handshake_error)?;
        if let Some(error) = response.error {
            return Err(LspError::Handshake(format!(
                "server returned error {}: {}",
                error.code, error.message
            )));
        }

        connection
            .notify(protocol::INITIALIZED, Some(serde_json::json!({})))
            .await
            .map_err(handshake_error)
    }

    pub async fn open_document(&self, path: &Path, text: &str) -> Result<(), LspError> {
        let connection = self.require_ready("openDocument")?;
        let uri = protocol::path_to_file_uri(path)?;
        let language_id = self.languages.language_id(path);
        tracing::debug!(uri = %uri, language_id, "Opening document");
        connection
            .notify(
                protocol::DID_OPEN,
                Some(protocol::did_open_params(
                    &uri,
                    language_id,
                    INITIAL_DOCUMENT_VERSION,
                    text,
                )),
            )
            .await
    }

    /// Replace the document's whole text at `version`.
    pub async fn change_document(
        &self,
        path: &Path,
        text: &str,
        version: i32,
    ) -> Result<(), LspError> {
        let connection = self.require_ready("changeDocument")?;
        let uri = protocol::path_to_file_uri(path)?;
        connection
            .notify(
                protocol::DID_CHANGE,
                Some(protocol::did_change_params(&uri, version, text)),
            )
            .await
    }

    /// Close the document and forget its diagnostics.
    pub async fn close_document(&self, path: &Path) -> Result<(), LspError> {
        let connection = self.require_ready("closeDocument")?;
        let uri = protocol::path_to_file_uri(path)?;
        connection
            .notify(protocol::DID_CLOSE, Some(protocol::did_close_params(&uri)))
            .await?;
        self.diagnostics.clear(&uri);
        Ok(())
    }

    /// Completion candidates at the zero-based `line`/`character`.
    pub async fn completions(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<Vec<CompletionItem>, LspError> {
        let connection = self.require_ready("completions")?;
        let uri = protocol::path_to_file_uri(path)?;
        let response = connection
            .request(
                protocol::COMPLETION,
                Some(protocol::completion_params(&uri, line, character)),
            )
            .await?;
        let result = into_result(response)?;
        CompletionResponse::from_result(result).map(CompletionResponse::into_items)
    }

    /// The first definition of the symbol at `line`/`character`, if any.
    pub async fn definition(
        &self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<Option<Location>, LspError> {
        let connection = self.require_ready("definition")?;
        let uri = protocol::path_to_file_uri(path)?;
        let response = connection
            .request(
                protocol::DEFINITION,
                Some(protocol::position_params(&uri, line, character)),
            )
            .await?;
        let result = into_result(response)?;
        DefinitionResponse::from_result(result).map(DefinitionResponse::first)
    }

    /// Protocol-level shutdown: `shutdown` request, then `exit`.
    ///
    /// A no-op before `initialize` and after a previous shutdown. `exit` is
    /// sent even when the server answers `shutdown` with an error.
    pub async fn shutdown(&self) -> Result<(), LspError> {
        let operation = "shutdown";
        match self.transition(Lifecycle::Ready, Lifecycle::ShuttingDown) {
            Ok(()) => {}
            Err(Lifecycle::Uninitialized | Lifecycle::ShuttingDown | Lifecycle::Terminated) => {
                return Ok(());
            }
            Err(state) => return Err(LspError::NotReady { operation, state }),
        }
        let Some(connection) = &self.connection else {
            self.set_lifecycle(Lifecycle::Terminated);
            return Ok(());
        };

        let outcome = async {
            let response = connection.request(protocol::SHUTDOWN, None).await?;
            if let Some(error) = response.error {
                tracing::warn!(
                    code = error.code,
                    "Language server rejected shutdown: {}",
                    error.message
                );
            }
            connection.notify(protocol::EXIT, None).await
        }
        .await;

        self.set_lifecycle(Lifecycle::Terminated);
        outcome
    }

    /// OS process id of the spawned server, while it runs.
    pub async fn process_id(&self) -> Option<u32> {
        self.process.lock().await.id()
    }

    /// Process-level stop. Blocks until the server and both background tasks are gone.
    pub async fn stop(&self) -> Option<ExitStatus> {
        let status = self.process.lock().await.stop().await;
        self.set_lifecycle(Lifecycle::Terminated);
        status
    }

    /// Polite shutdown bounded by the grace period, then process-level stop.
    pub async fn terminate(&self) -> Option<ExitStatus> {
        match tokio::time::timeout(self.grace_period, self.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Protocol shutdown failed: {e}"),
            Err(_) => tracing::debug!("Protocol shutdown timed out"),
        }
        self.stop().await
    }

    /// Diagnostics last published for `uri`; empty if none.
    #[must_use]
    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.diagnostics.get(uri)
    }

    pub fn clear_diagnostics(&self, uri: &str) {
        self.diagnostics.clear(uri);
    }

    #[must_use]
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

/// Returns the client to `Uninitialized` unless the handshake reached `Ready`,
/// including when the `initialize` future is dropped mid-handshake.
struct InitializeGuard<'a> {
    lifecycle: &'a RwLock<Lifecycle>,
}

impl Drop for InitializeGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        if *state == Lifecycle::Initializing {
            *state = Lifecycle::Uninitialized;
        }
    }
}

/// The result of a non-handshake response, or its JSON-RPC error.
fn into_result(response: Response) -> Result<Option<Value>, LspError> {
    match response.error {
        Some(error) => Err(LspError::Server {
            code: error.code,
            message: error.message,
        }),
        None => Ok(response.result),
    }
}
