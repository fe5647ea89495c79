//! WebSocket backend client.
//!
//! Implements the [`Backend`] trait over a single WebSocket connection to
//! the backend server. Requests are tagged with an id and correlated with
//! their responses through `oneshot` channels; change frames are routed to
//! the matching [`Subscription`] by subscription id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kanban_proto::backend::{
    ClientFrame, Filter, NewRow, Patch, Query, Request, Response, Row, ServerFrame,
    SubscriptionId, Table, Value,
};
use kanban_proto::codec;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Backend, BackendError, Notification, Subscription};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Connection timeouts for [`WsBackend`].
#[derive(Debug, Clone, Copy)]
pub struct WsOptions {
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for each request/response round trip.
    pub request_timeout: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A request waiting for its response.
struct Pending {
    reply: oneshot::Sender<Response>,
    /// For subscribe requests: where change frames go once the
    /// subscription id is known.
    events: Option<mpsc::UnboundedSender<Notification>>,
}

/// State shared between the client handle and its background tasks.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Notification>>>,
    next_request: AtomicU64,
    connected: AtomicBool,
}

impl Shared {
    /// Fails every outstanding request and ends every subscription.
    fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.pending.lock().clear();
        self.subscribers.lock().clear();
    }
}

/// WebSocket client implementing the [`Backend`] trait.
///
/// Created via [`WsBackend::connect`], which establishes the connection
/// and spawns background reader and writer tasks.
pub struct WsBackend {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl WsBackend {
    /// Connect to a backend server.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Timeout`] if the connection is not established in time.
    /// - [`BackendError::Unreachable`] if the server refuses the connection.
    /// - [`BackendError::Io`] for TLS, HTTP and other connection failures.
    pub async fn connect(url: &str, options: WsOptions) -> Result<Self, BackendError> {
        let (ws_stream, _response) =
            tokio::time::timeout(options.connect_timeout, connect_async(url))
                .await
                .map_err(|_| {
                    tracing::warn!(url, "backend WebSocket connect timed out");
                    BackendError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url, err = %e, "backend WebSocket connect failed");
                    map_ws_connect_error(url, e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            next_request: AtomicU64::new(1),
            ..Shared::default()
        });

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let writer_handle = tokio::spawn(writer_loop(ws_sender, outgoing_rx, Arc::clone(&shared)));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, Arc::clone(&shared)));

        tracing::info!(url, "connected to backend");

        Ok(Self {
            url: url.to_string(),
            outgoing,
            shared,
            request_timeout: options.request_timeout,
            reader_handle,
            writer_handle,
        })
    }

    /// The backend URL this client is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Sends a request and waits for its response.
    async fn call(
        &self,
        request: Request,
        events: Option<mpsc::UnboundedSender<Notification>>,
    ) -> Result<Response, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::ConnectionClosed);
        }

        let id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let bytes = codec::encode_client(&ClientFrame::Request { id, request })?;

        let (reply, response) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(id, Pending { reply, events });

        if self.outgoing.send(Message::Binary(bytes.into())).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(BackendError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, response).await {
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                tracing::warn!(request_id = id, url = %self.url, "backend request timed out");
                Err(BackendError::Timeout)
            }
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Ok(Ok(Response::Error(reason))) => {
                tracing::debug!(request_id = id, reason = %reason, "backend rejected request");
                Err(BackendError::Rejected(reason))
            }
            Ok(Ok(response)) => Ok(response),
        }
    }
}

impl Drop for WsBackend {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

impl Backend for WsBackend {
    async fn select(&self, query: Query) -> Result<Vec<Row>, BackendError> {
        match self.call(Request::Select(query), None).await? {
            Response::Rows(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    async fn insert(&self, row: NewRow) -> Result<Row, BackendError> {
        match self.call(Request::Insert(row), None).await? {
            Response::Row(Some(row)) => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    async fn update(
        &self,
        table: Table,
        id: Value,
        patch: Patch,
    ) -> Result<Option<Row>, BackendError> {
        match self.call(Request::Update { table, id, patch }, None).await? {
            Response::Row(row) => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete(&self, table: Table, id: Value) -> Result<Option<Row>, BackendError> {
        match self.call(Request::Delete { table, id }, None).await? {
            Response::Row(row) => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    async fn subscribe(
        &self,
        table: Table,
        filter: Option<Filter>,
    ) -> Result<Subscription, BackendError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let response = self
            .call(Request::Subscribe { table, filter }, Some(events_tx))
            .await?;
        let Response::Subscribed(sub_id) = response else {
            return Err(unexpected(&response));
        };

        tracing::info!(subscription = sub_id.0, %table, "subscribed to changes");

        let shared = Arc::clone(&self.shared);
        let outgoing = self.outgoing.clone();
        Ok(Subscription::new(sub_id, table, events_rx, move || {
            shared.subscribers.lock().remove(&sub_id);
            if !shared.connected.load(Ordering::Relaxed) {
                return;
            }
            // Fire and forget: the response has no pending entry and is dropped.
            let id = shared.next_request.fetch_add(1, Ordering::Relaxed);
            let frame = ClientFrame::Request {
                id,
                request: Request::Unsubscribe {
                    subscription: sub_id,
                },
            };
            match codec::encode_client(&frame) {
                Ok(bytes) => {
                    let _ = outgoing.send(Message::Binary(bytes.into()));
                }
                Err(e) => tracing::warn!(err = %e, "failed to encode unsubscribe"),
            }
        }))
    }
}

fn unexpected(response: &Response) -> BackendError {
    BackendError::UnexpectedResponse(format!("{response:?}"))
}

/// Background task that drains the outgoing channel into the socket.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
) {
    while let Some(msg) = outgoing.recv().await {
        if let Err(e) = ws_sender.send(msg).await {
            tracing::warn!(err = %e, "backend send failed");
            break;
        }
    }
    shared.disconnect();
}

/// Hands a notification to its subscription, forgetting subscriptions
/// whose receiver is gone.
fn deliver(shared: &Shared, subscription: SubscriptionId, notification: Notification) {
    let sender = shared.subscribers.lock().get(&subscription).cloned();
    match sender {
        Some(tx) => {
            if tx.send(notification).is_err() {
                shared.subscribers.lock().remove(&subscription);
            }
        }
        None => {
            tracing::debug!(
                subscription = subscription.0,
                "notification for closed subscription"
            );
        }
    }
}

/// Background task that reads frames and dispatches them.
///
/// Responses complete the matching pending request. A `Subscribed`
/// response registers the subscription's event channel before the caller
/// is woken, so no change frame that follows it can be missed.
/// Malformed frames are logged and skipped.
async fn reader_loop(mut ws_reader: WsReader, shared: Arc<Shared>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode_server(&data) {
                Ok(ServerFrame::Response { id, response }) => {
                    let Some(pending) = shared.pending.lock().remove(&id) else {
                        tracing::debug!(request_id = id, "response with no waiting request");
                        continue;
                    };
                    if let (Response::Subscribed(sub_id), Some(events)) =
                        (&response, pending.events)
                    {
                        shared.subscribers.lock().insert(*sub_id, events);
                    }
                    let _ = pending.reply.send(response);
                }
                Ok(ServerFrame::Change {
                    subscription,
                    event,
                }) => deliver(&shared, subscription, Notification::Change(event)),
                Ok(ServerFrame::Resync { subscription }) => {
                    tracing::info!(subscription = subscription.0, "backend asked for resync");
                    deliver(&shared, subscription, Notification::Resync);
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed backend frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("backend WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "backend WebSocket read error");
                break;
            }
        }
    }
    shared.disconnect();
    tracing::info!("backend reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`BackendError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> BackendError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                BackendError::Unreachable(url.to_string())
            } else {
                BackendError::Io(io_err)
            }
        }
        WsError::Tls(_) => BackendError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => BackendError::Io(std::io::Error::other(format!(
            "backend HTTP error: status {}",
            response.status()
        ))),
        other => BackendError::Io(std::io::Error::other(format!(
            "backend connection error: {other}"
        ))),
    }
}
