//! Handshake, readiness gating, and shutdown.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tron_lsp::{Lifecycle, LspError, document_uri};

use crate::common::{self, request_id};

#[tokio::test]
async fn initialize_reaches_ready_and_sends_initialized() {
    let (client, mut server) = common::connect();
    let init = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize(Path::new("/proj")).await })
    };

    let request = server.expect_request("initialize").await;
    assert_eq!(request_id(&request), 1);
    assert_eq!(
        request["params"]["rootUri"],
        document_uri(Path::new("/proj")).unwrap()
    );
    let capabilities = &request["params"]["capabilities"]["textDocument"];
    assert!(capabilities["completion"].is_object());
    assert!(capabilities["definition"].is_object());
    assert!(capabilities["publishDiagnostics"].is_object());

    server
        .send(&json!({ "id": 1, "result": { "capabilities": {} } }))
        .await;
    server.expect_notification("initialized").await;

    init.await.unwrap().unwrap();
    assert_eq!(client.lifecycle(), Lifecycle::Ready);
    assert!(client.is_ready());
}

#[tokio::test]
async fn open_document_before_initialize_fails_without_writing() {
    let (client, mut server) = common::connect();

    let err = client
        .open_document(Path::new("a.py"), "x=1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LspError::NotReady {
            operation: "openDocument",
            state: Lifecycle::Uninitialized
        }
    ));

    // The first frame on the wire is the handshake: nothing leaked out before it.
    let init = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize(Path::new("/proj")).await })
    };
    let first = server.accept_handshake().await;
    assert_eq!(first["method"], "initialize");
    assert_eq!(request_id(&first), 1);
    init.await.unwrap().unwrap();
}

#[tokio::test]
async fn operations_during_handshake_are_not_ready() {
    let (client, mut server) = common::connect();
    let init = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize(Path::new("/proj")).await })
    };

    let request = server.expect_request("initialize").await;
    assert_eq!(client.lifecycle(), Lifecycle::Initializing);
    assert!(matches!(
        client.completions(Path::new("a.py"), 0, 0).await,
        Err(LspError::NotReady {
            state: Lifecycle::Initializing,
            ..
        })
    ));
    assert!(matches!(
        client.shutdown().await,
        Err(LspError::NotReady {
            operation: "shutdown",
            state: Lifecycle::Initializing
        })
    ));

    server
        .respond(request_id(&request), json!({ "capabilities": {} }))
        .await;
    server.expect_notification("initialized").await;
    init.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_initialize_can_be_retried() {
    let (client, mut server) = common::connect();
    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize(Path::new("/proj")).await })
    };
    let request = server.expect_request("initialize").await;
    server
        .respond_error(request_id(&request), -32002, "server not ready")
        .await;
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, LspError::Handshake(ref msg) if msg.contains("server not ready")));
    assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);

    let retry = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize(Path::new("/proj")).await })
    };
    let request = server.accept_handshake().await;
    assert_eq!(request_id(&request), 2);
    retry.await.unwrap().unwrap();
    assert!(client.is_ready());
}

#[tokio::test]
async fn server_closing_during_initialize_is_handshake_error() {
    let (client, mut server) = common::connect();
    let init = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.initialize(Path::new("/proj")).await })
    };
    server.expect_request("initialize").await;
    drop(server);

    let err = init.await.unwrap().unwrap_err();
    assert!(matches!(err, LspError::Handshake(_)));
    assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);
}

#[tokio::test]
async fn shutdown_sends_exit_even_when_server_errors() {
    let (client, mut server) = common::ready_client().await;
    let shutdown = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.shutdown().await })
    };

    let request = server.expect_request("shutdown").await;
    server
        .respond_error(request_id(&request), -32603, "internal error")
        .await;
    server.expect_notification("exit").await;

    shutdown.await.unwrap().unwrap();
    assert_eq!(client.lifecycle(), Lifecycle::Terminated);
}

#[tokio::test]
async fn shutdown_before_initialize_is_noop() {
    let (client, _server) = common::connect();
    client.shutdown().await.unwrap();
    assert_eq!(client.lifecycle(), Lifecycle::Uninitialized);
}

#[tokio::test]
async fn terminate_shuts_down_then_closes_input() {
    let (client, mut server) = common::ready_client().await;
    let terminate = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.terminate().await })
    };

    let request = server.expect_request("shutdown").await;
    server.respond(request_id(&request), Value::Null).await;
    server.expect_notification("exit").await;
    assert!(server.try_recv().await.is_none());

    // In-memory clients have no process to report on.
    assert!(terminate.await.unwrap().is_none());
    assert_eq!(client.lifecycle(), Lifecycle::Terminated);
    assert!(matches!(
        client.open_document(Path::new("a.py"), "x").await,
        Err(LspError::NotReady {
            state: Lifecycle::Terminated,
            ..
        })
    ));
}
