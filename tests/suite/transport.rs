//! Framing, message decoding, and connection-loss behaviour.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tron_lsp::codec::{FrameReader, MAX_FRAME_BYTES, encode_frame};
use tron_lsp::message::{Message, Notification, Request, Response, ResponseError};
use tron_lsp::{FramingError, LspError, LspEvent, ServerStopReason};

use crate::common::{self, request_id};

async fn round_trip(message: Message) -> Message {
    let frame = encode_frame(&message.encode().unwrap());
    let mut reader = FrameReader::new(frame.as_slice());
    let body = reader.read_frame().await.unwrap().unwrap();
    Message::decode(&body).unwrap()
}

#[tokio::test]
async fn every_message_kind_survives_the_wire() {
    let request = Message::Request(Request::new(
        7,
        "textDocument/hover",
        Some(json!({ "position": { "line": 1, "character": 2 } })),
    ));
    assert_eq!(round_trip(request.clone()).await, request);

    let success = Message::Response(Response::success(7, json!({ "contents": "doc" })));
    assert_eq!(round_trip(success.clone()).await, success);
    let failure = Message::Response(Response::failure(8, ResponseError::new(-32601, "nope")));
    assert_eq!(round_trip(failure.clone()).await, failure);

    let notification = Message::Notification(Notification::new("exit", None));
    assert_eq!(round_trip(notification.clone()).await, notification);
}

#[tokio::test]
async fn headers_in_any_order_and_case() {
    let body = br#"{"jsonrpc":"2.0","method":"exit"}"#;
    let mut stream = format!(
        "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    stream.extend_from_slice(body);

    let mut reader = FrameReader::new(stream.as_slice());
    assert_eq!(reader.read_frame().await.unwrap().unwrap(), body);
    assert!(reader.read_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_frame_is_skipped_and_stream_stays_aligned() {
    let mut stream = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1).into_bytes();
    stream.resize(stream.len() + MAX_FRAME_BYTES + 1, b'x');
    stream.extend_from_slice(&encode_frame(b"{}"));

    let mut reader = FrameReader::new(stream.as_slice());
    let err = reader.read_frame().await.unwrap_err();
    assert!(matches!(err, FramingError::FrameTooLarge { .. }));
    assert!(!err.is_fatal());
    assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"{}");
}

#[tokio::test]
async fn connection_loss_cancels_outstanding_request() {
    let (client, mut server) = common::ready_client().await;
    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.completions(Path::new("a.py"), 0, 0).await })
    };
    server.expect_request("textDocument/completion").await;
    drop(server);

    let err = tokio::time::timeout(common::STEP_TIMEOUT, call)
        .await
        .expect("wait did not unblock")
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());

    // The connection is gone for good.
    assert!(matches!(
        client.completions(Path::new("a.py"), 0, 0).await,
        Err(LspError::Cancelled)
    ));
}

#[tokio::test]
async fn malformed_frames_do_not_stop_the_client() {
    let (client, mut server) = common::ready_client().await;
    server.send_body(b"this is not json").await;
    server.send_body(br#"{"jsonrpc":"2.0","id":"abc","result":null}"#).await;
    server.send_body(br#"{"jsonrpc":"2.0","id":999,"result":null}"#).await;

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.completions(Path::new("a.py"), 0, 0).await })
    };
    let request = server.expect_request("textDocument/completion").await;
    server
        .respond(request_id(&request), json!([{ "label": "alive" }]))
        .await;
    let items = call.await.unwrap().unwrap();
    assert_eq!(items[0].label, "alive");
}

#[tokio::test]
async fn response_with_wrong_shape_fails_only_its_request() {
    let (client, mut server) = common::ready_client().await;
    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.completions(Path::new("a.py"), 0, 0).await })
    };
    let request = server.expect_request("textDocument/completion").await;
    server
        .send(&json!({
            "jsonrpc": "2.0",
            "id": request_id(&request),
            "error": "not an error object"
        }))
        .await;
    assert!(matches!(call.await.unwrap(), Err(LspError::Decode(_))));
    assert!(client.is_ready());
}

#[tokio::test]
async fn server_requests_are_refused_with_method_not_found() {
    let (client, mut server) = common::ready_client().await;
    server
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "workspace/configuration",
            "params": { "items": [] }
        }))
        .await;

    let reply = server.recv().await;
    assert_eq!(reply["id"], 42);
    assert_eq!(reply["error"]["code"], -32601);
    assert!(reply.get("method").is_none());
    assert!(client.is_ready());
}

#[tokio::test]
async fn truncated_frame_stops_reader_with_failure() {
    let (client_io, mut server_io) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(client_io);
    let (events_tx, mut events) = tokio::sync::mpsc::channel(4);
    let mut client =
        tron_lsp::LspClient::in_memory(tron_lsp::LanguageTable::default()).with_event_sender(events_tx);
    client.attach(read, write).unwrap();

    server_io
        .write_all(b"Content-Length: 100\r\n\r\n{\"partial\":")
        .await
        .unwrap();
    drop(server_io);

    match common::next_event(&mut events).await {
        LspEvent::ServerStopped {
            reason: ServerStopReason::Failed(_),
        } => {}
        other => panic!("expected a failed stop, got {other:?}"),
    }
}
