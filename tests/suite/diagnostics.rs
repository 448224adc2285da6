//! Server-pushed diagnostics and the event feed.

use std::path::Path;

use serde_json::{Value, json};
use tron_lsp::{DiagnosticSeverity, LspEvent, ServerStopReason, document_uri};

use crate::common::{self, FakeServer};

fn diagnostic(line: u32, severity: u8, message: &str) -> Value {
    json!({
        "range": {
            "start": { "line": line, "character": 0 },
            "end": { "line": line, "character": 3 }
        },
        "severity": severity,
        "source": "pyflakes",
        "message": message
    })
}

async fn publish(server: &mut FakeServer, uri: &str, diagnostics: Value) {
    server
        .notify(
            "textDocument/publishDiagnostics",
            json!({ "uri": uri, "diagnostics": diagnostics }),
        )
        .await;
}

#[tokio::test]
async fn published_diagnostics_reach_table_and_events() {
    let (client, mut server, mut events) = common::connect_with_events(16);
    common::initialize(&client, &mut server, Path::new("/proj")).await;
    let uri = document_uri(Path::new("/proj/a.py")).unwrap();

    publish(
        &mut server,
        &uri,
        json!([
            diagnostic(0, 1, "undefined name 'x'"),
            diagnostic(3, 2, "unused import")
        ]),
    )
    .await;

    match common::next_event(&mut events).await {
        LspEvent::Diagnostics { uri: got, items } => {
            assert_eq!(got, uri);
            assert_eq!(items.len(), 2);
        }
        other @ LspEvent::ServerStopped { .. } => panic!("unexpected event {other:?}"),
    }

    let items = client.diagnostics(&uri);
    assert_eq!(items[0].severity(), DiagnosticSeverity::Error);
    assert_eq!(items[0].message(), "undefined name 'x'");
    assert_eq!(items[0].source(), "pyflakes");
    assert_eq!(items[1].range().start.line, 3);

    let snapshot = client.diagnostics_snapshot();
    assert_eq!(snapshot.error_count(), 1);
    assert_eq!(snapshot.warning_count(), 1);
    assert_eq!(snapshot.status_string(), "E:1 W:1");
}

#[tokio::test]
async fn republishing_replaces_previous_diagnostics() {
    let (client, mut server, mut events) = common::connect_with_events(16);
    common::initialize(&client, &mut server, Path::new("/proj")).await;
    let uri = document_uri(Path::new("/proj/a.py")).unwrap();

    publish(&mut server, &uri, json!([diagnostic(0, 1, "first")])).await;
    common::next_event(&mut events).await;
    publish(&mut server, &uri, json!([diagnostic(1, 2, "second")])).await;
    common::next_event(&mut events).await;

    let items = client.diagnostics(&uri);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].message(), "second");

    publish(&mut server, &uri, json!([])).await;
    common::next_event(&mut events).await;
    assert!(client.diagnostics(&uri).is_empty());
    assert!(client.diagnostics_snapshot().is_empty());
}

#[tokio::test]
async fn clear_diagnostics_forgets_document() {
    let (client, mut server, mut events) = common::connect_with_events(16);
    common::initialize(&client, &mut server, Path::new("/proj")).await;
    let uri = document_uri(Path::new("/proj/a.py")).unwrap();

    publish(&mut server, &uri, json!([diagnostic(0, 1, "boom")])).await;
    common::next_event(&mut events).await;
    client.clear_diagnostics(&uri);

    assert!(client.diagnostics(&uri).is_empty());
    assert!(client.diagnostics_snapshot().documents().is_empty());
}

#[tokio::test]
async fn diagnostics_arrive_before_initialize_completes() {
    let (client, mut server, mut events) = common::connect_with_events(16);
    let uri = "file:///proj/early.py";

    publish(&mut server, uri, json!([diagnostic(0, 2, "early")])).await;
    common::next_event(&mut events).await;
    assert_eq!(client.diagnostics(uri).len(), 1);
}

#[tokio::test]
async fn server_exit_emits_stopped_event() {
    let (_client, server, mut events) = common::connect_with_events(16);
    drop(server);

    match common::next_event(&mut events).await {
        LspEvent::ServerStopped { reason } => assert_eq!(reason, ServerStopReason::Exited),
        other @ LspEvent::Diagnostics { .. } => panic!("unexpected event {other:?}"),
    }
}
