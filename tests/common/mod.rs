//! Shared test utilities and fixtures
//!
//! A scripted language server over an in-memory duplex pipe.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tron_lsp::codec::{FrameReader, FrameWriter};
use tron_lsp::{LanguageTable, LspClient, LspEvent};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Upper bound for any single step of a scripted exchange.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// The server end of an in-memory connection.
pub struct FakeServer {
    rx: FrameReader<ReadHalf<DuplexStream>>,
    tx: FrameWriter<WriteHalf<DuplexStream>>,
}

impl FakeServer {
    /// Next frame from the client, parsed as JSON. Panics on EOF.
    pub async fn recv(&mut self) -> Value {
        let body = tokio::time::timeout(STEP_TIMEOUT, self.rx.read_frame())
            .await
            .expect("timed out waiting for a client frame")
            .expect("framing error")
            .expect("client closed the connection");
        serde_json::from_slice(&body).expect("client sent invalid JSON")
    }

    /// `None` once the client has closed its input stream.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let body = tokio::time::timeout(STEP_TIMEOUT, self.rx.read_frame())
            .await
            .expect("timed out waiting for a client frame")
            .expect("framing error")?;
        Some(serde_json::from_slice(&body).expect("client sent invalid JSON"))
    }

    /// Expect a request for `method`; returns the whole message.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let message = self.recv().await;
        assert_eq!(message["method"], method, "unexpected frame: {message}");
        assert!(message["id"].is_u64(), "request without id: {message}");
        message
    }

    /// Expect a notification for `method`; returns its params.
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let message = self.recv().await;
        assert_eq!(message["method"], method, "unexpected frame: {message}");
        assert!(message.get("id").is_none(), "notification with id: {message}");
        message["params"].clone()
    }

    pub async fn send(&mut self, message: &Value) {
        let body = serde_json::to_vec(message).expect("serialize");
        self.send_body(&body).await;
    }

    /// Write an arbitrary body as one frame.
    pub async fn send_body(&mut self, body: &[u8]) {
        self.tx.write_frame(body).await.expect("write to client");
    }

    pub async fn respond(&mut self, id: u64, result: Value) {
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    pub async fn respond_error(&mut self, id: u64, code: i64, message: &str) {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await;
    }

    /// Answer `initialize` and consume the `initialized` notification.
    pub async fn accept_handshake(&mut self) -> Value {
        let init = self.expect_request("initialize").await;
        self.respond(request_id(&init), json!({ "capabilities": {} }))
            .await;
        self.expect_notification("initialized").await;
        init
    }
}

pub fn request_id(message: &Value) -> u64 {
    message["id"].as_u64().expect("message has an integer id")
}

fn pipes() -> (
    ReadHalf<DuplexStream>,
    WriteHalf<DuplexStream>,
    FakeServer,
) {
    let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (server_read, server_write) = tokio::io::split(server_io);
    let server = FakeServer {
        rx: FrameReader::new(server_read),
        tx: FrameWriter::new(server_write),
    };
    (client_read, client_write, server)
}

/// An attached, uninitialized client and its scripted server.
pub fn connect() -> (Arc<LspClient>, FakeServer) {
    let (read, write, server) = pipes();
    let client = LspClient::connect(read, write, LanguageTable::default())
        .expect("attach in-memory client");
    (Arc::new(client), server)
}

/// Like [`connect`], with the event feed wired up.
pub fn connect_with_events(
    capacity: usize,
) -> (Arc<LspClient>, FakeServer, mpsc::Receiver<LspEvent>) {
    let (read, write, server) = pipes();
    let (events_tx, events_rx) = mpsc::channel(capacity);
    let mut client = LspClient::in_memory(LanguageTable::default()).with_event_sender(events_tx);
    client.attach(read, write).expect("attach in-memory client");
    (Arc::new(client), server, events_rx)
}

/// Drive the handshake on both ends.
pub async fn initialize(client: &Arc<LspClient>, server: &mut FakeServer, root: &Path) {
    let init = {
        let client = Arc::clone(client);
        let root = root.to_path_buf();
        tokio::spawn(async move { client.initialize(&root).await })
    };
    server.accept_handshake().await;
    init.await
        .expect("initialize task panicked")
        .expect("initialize failed");
}

/// A client that has completed the handshake.
pub async fn ready_client() -> (Arc<LspClient>, FakeServer) {
    let (client, mut server) = connect();
    initialize(&client, &mut server, Path::new("/proj")).await;
    (client, server)
}

/// Next event, failing the test if none arrives in time.
pub async fn next_event(events: &mut mpsc::Receiver<LspEvent>) -> LspEvent {
    tokio::time::timeout(STEP_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}
