//! Correlation engine: request IDs, pending requests, and the read loop.
//!
//! Callers `send` a request and later `wait` on its ID. One background
//! reader decodes frames in arrival order and fulfils the matching pending
//! request, so responses may complete out of send order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{FrameReader, FrameWriter};
use crate::diagnostics::NotificationDispatcher;
use crate::error::LspError;
use crate::message::{
    self, DecodeFailure, Message, Notification, Request, Response, ResponseError,
};
use crate::types::{LspEvent, ServerStopReason};

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Delivery = Result<Response, LspError>;

/// Both halves of one request's single-slot rendezvous.
///
/// The reader takes `sender`; the waiter takes `receiver`. The entry itself
/// is removed by the waiter (or its drop guard) exactly once.
struct PendingRequest {
    sender: Option<oneshot::Sender<Delivery>>,
    receiver: Option<oneshot::Receiver<Delivery>>,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) {
        let (sender, receiver) = oneshot::channel();
        let previous = self.lock().insert(
            id,
            PendingRequest {
                sender: Some(sender),
                receiver: Some(receiver),
            },
        );
        debug_assert!(previous.is_none(), "request id {id} reused");
    }

    fn take_receiver(&self, id: u64) -> Option<oneshot::Receiver<Delivery>> {
        self.lock().get_mut(&id).and_then(|entry| entry.receiver.take())
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Fulfil `id`. Returns false if nobody is waiting for it any more.
    fn deliver(&self, id: u64, delivery: Delivery) -> bool {
        let sender = self.lock().get_mut(&id).and_then(|entry| entry.sender.take());
        match sender {
            Some(sender) => sender.send(delivery).is_ok(),
            None => false,
        }
    }

    /// Resolve every outstanding request with [`LspError::Cancelled`].
    fn cancel_all(&self) {
        let senders: Vec<_> = self
            .lock()
            .values_mut()
            .filter_map(|entry| entry.sender.take())
            .collect();
        for sender in senders {
            let _ = sender.send(Err(LspError::Cancelled));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes a pending entry when the waiter finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl PendingGuard<'_> {
    /// Hand the entry over to a later `wait`.
    fn defuse(self) {
        std::mem::forget(self);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

pub(crate) struct Connection {
    /// `None` once the input stream has been closed.
    writer: tokio::sync::Mutex<Option<FrameWriter<BoxedWriter>>>,
    next_id: AtomicU64,
    pending: PendingRequests,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(writer: BoxedWriter, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            writer: tokio::sync::Mutex::new(Some(FrameWriter::new(writer))),
            next_id: AtomicU64::new(1),
            pending: PendingRequests::default(),
            cancel,
        })
    }

    /// Allocate an ID, register it, and write the request frame.
    ///
    /// The pending entry only outlives this call once the frame is written;
    /// a write failure or a dropped future removes it.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<u64, LspError> {
        if self.cancel.is_cancelled() {
            return Err(LspError::Cancelled);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.register(id);
        let guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let request = Message::Request(Request::new(id, method, params));
        self.write_message(method, &request).await?;
        guard.defuse();
        tracing::trace!(id, method, "Sent request");
        Ok(id)
    }

    /// Block until `id` is answered, fails to decode, or the connection is cancelled.
    pub async fn wait(&self, id: u64) -> Result<Response, LspError> {
        let Some(receiver) = self.pending.take_receiver(id) else {
            return Err(LspError::UnknownRequest(id));
        };
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        tokio::select! {
            biased;
            delivery = receiver => delivery.unwrap_or(Err(LspError::Cancelled)),
            () = self.cancel.cancelled() => Err(LspError::Cancelled),
        }
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Response, LspError> {
        let id = self.send(method, params).await?;
        self.wait(id).await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        if self.cancel.is_cancelled() {
            return Err(LspError::Cancelled);
        }
        let notification = Message::Notification(Notification::new(method, params));
        self.write_message(method, &notification).await?;
        tracing::trace!(method, "Sent notification");
        Ok(())
    }

    /// Close the input stream, signalling EOF to the server. Idempotent.
    pub async fn close_input(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            tracing::debug!("Closing LSP input stream: {e}");
        }
    }

    #[cfg(test)]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The writer lock spans exactly one frame, so frames never interleave.
    async fn write_message(&self, method: &str, message: &Message) -> Result<(), LspError> {
        let body = message.encode()?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(LspError::Transport {
                method: method.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "input stream closed",
                ),
            });
        };
        writer
            .write_frame(&body)
            .await
            .map_err(|source| LspError::Transport {
                method: method.to_string(),
                source,
            })
    }

    /// Start the background read loop over `reader`.
    ///
    /// The loop exits on EOF, a fatal framing error, or cancellation. On
    /// exit every outstanding request is resolved with `Cancelled` and the
    /// shared token is fired.
    pub fn spawn_reader<R>(
        self: &Arc<Self>,
        reader: R,
        dispatcher: NotificationDispatcher,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            let stop_reason = loop {
                let frame = tokio::select! {
                    () = connection.cancel.cancelled() => break None,
                    frame = reader.read_frame() => frame,
                };
                match frame {
                    Ok(Some(body)) => connection.dispatch(&body, &dispatcher),
                    Ok(None) => {
                        tracing::info!("Language server closed stdout");
                        break Some(ServerStopReason::Exited);
                    }
                    Err(e) if e.is_fatal() => {
                        tracing::warn!("LSP reader error: {e}");
                        break Some(ServerStopReason::Failed(e.to_string()));
                    }
                    Err(e) => tracing::warn!("Dropping malformed LSP frame: {e}"),
                }
            };

            connection.pending.cancel_all();
            connection.cancel.cancel();
            if let Some(reason) = stop_reason {
                dispatcher.emit(LspEvent::ServerStopped { reason });
            }
        })
    }

    /// Route one decoded frame. Never awaits.
    fn dispatch(self: &Arc<Self>, body: &[u8], dispatcher: &NotificationDispatcher) {
        match Message::decode(body) {
            Ok(Message::Response(response)) => {
                let id = response.id;
                if !self.pending.deliver(id, Ok(response)) {
                    tracing::debug!(id, "Dropping response with no waiting request");
                }
            }
            Ok(Message::Notification(notification)) => {
                dispatcher.dispatch(&notification.method, notification.params);
            }
            Ok(Message::Request(request)) => self.reject_server_request(request),
            Err(DecodeFailure {
                id: Some(id),
                reason,
            }) => {
                tracing::warn!(id, "Undecodable response: {reason}");
                self.pending.deliver(id, Err(LspError::Decode(reason)));
            }
            Err(DecodeFailure { id: None, reason }) => {
                tracing::warn!("Ignoring undecodable LSP frame: {reason}");
            }
        }
    }

    /// Servers may block until their requests are answered, so every one
    /// gets "method not found". The reply is written off the reader task.
    fn reject_server_request(self: &Arc<Self>, request: Request) {
        tracing::debug!(
            id = request.id,
            method = %request.method,
            "Server sent request, replying method not found"
        );
        let reply = Message::Response(Response::failure(
            request.id,
            ResponseError::new(
                message::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        ));
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = connection.write_message(&request.method, &reply).await {
                tracing::debug!("Failed to reject server request: {e}");
            }
        });
    }
}
