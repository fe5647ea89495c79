//! Backend server core: shared state, WebSocket handler, request dispatch
//! and per-connection change subscriptions.
//!
//! Each connection gets a writer task fed by an unbounded channel, a reader
//! task that answers requests in arrival order, and a forwarder task that
//! filters the database change feed through the connection's open
//! subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use kanban_proto::backend::{
    ChangeEvent, ClientFrame, Filter, Request, Response, ServerFrame, SubscriptionId, Table,
};
use kanban_proto::codec;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};

use crate::tables::Database;

/// Default maximum accepted frame size in bytes (64 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// An open change subscription on one connection.
#[derive(Debug, Clone)]
struct Subscription {
    table: Table,
    filter: Option<Filter>,
}

impl Subscription {
    fn wants(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| event.row.matches(filter))
    }
}

type SubscriptionMap = Mutex<HashMap<SubscriptionId, Subscription>>;

/// Shared server state: the database plus the live connection registry.
pub struct BackendState {
    /// Tables and change feed.
    pub db: Database,
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_connection: AtomicU64,
    next_subscription: AtomicU64,
    open_subscriptions: AtomicUsize,
    max_frame_size: usize,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Creates a state with an empty database and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE, Database::new())
    }

    /// Creates a state with a custom frame size limit and database.
    #[must_use]
    pub fn with_config(max_frame_size: usize, db: Database) -> Self {
        Self {
            db,
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            open_subscriptions: AtomicUsize::new(0),
            max_frame_size,
        }
    }

    /// Number of currently connected clients.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of open change subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.open_subscriptions.load(Ordering::SeqCst)
    }

    /// Send a WebSocket Close frame to all connected clients.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn_id, sender) in conns.iter() {
            tracing::info!(conn_id, "sending close frame to client");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
pub async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn_id = state.next_connection.fetch_add(1, Ordering::Relaxed);

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.connections.write().await.insert(conn_id, tx.clone());
    tracing::info!(conn_id, "client connected");

    let subscriptions: Arc<SubscriptionMap> = Arc::new(Mutex::new(HashMap::new()));

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let feed = state.db.subscribe();
    let mut forward_task = tokio::spawn(forward_changes(
        conn_id,
        feed,
        Arc::clone(&subscriptions),
        tx.clone(),
    ));

    let reader_state = Arc::clone(&state);
    let reader_subs = Arc::clone(&subscriptions);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    if data.len() > reader_state.max_frame_size {
                        tracing::warn!(
                            conn_id,
                            size = data.len(),
                            max = reader_state.max_frame_size,
                            "frame exceeds size limit, dropped"
                        );
                        continue;
                    }
                    handle_binary_message(conn_id, &data, &reader_state, &reader_subs, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {}
        _ = &mut write_task => {}
        _ = &mut forward_task => {}
    }
    read_task.abort();
    write_task.abort();
    forward_task.abort();

    let leftover = subscriptions.lock().await.len();
    state.open_subscriptions.fetch_sub(leftover, Ordering::SeqCst);
    state.connections.write().await.remove(&conn_id);
    tracing::info!(conn_id, "client disconnected");
}

/// Delivers database changes matching this connection's subscriptions.
///
/// When the feed lags, every open subscription gets one `Resync` frame in
/// place of the events it may have missed.
///
/// The subscription map lock is held while frames are queued so a
/// `Subscribed` response is always queued before the first change for it.
async fn forward_changes(
    conn_id: u64,
    mut feed: broadcast::Receiver<ChangeEvent>,
    subscriptions: Arc<SubscriptionMap>,
    tx: mpsc::UnboundedSender<Message>,
) {
    loop {
        let event = match feed.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(conn_id, skipped, "change feed lagged, asking subscribers to resync");
                let subs = subscriptions.lock().await;
                for id in subs.keys() {
                    if !queue_frame(&tx, &ServerFrame::Resync { subscription: *id }) {
                        return;
                    }
                }
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let subs = subscriptions.lock().await;
        for (id, sub) in subs.iter() {
            if !sub.wants(&event) {
                continue;
            }
            let frame = ServerFrame::Change {
                subscription: *id,
                event: event.clone(),
            };
            if !queue_frame(&tx, &frame) {
                return;
            }
        }
    }
}

/// Decodes and answers one client frame.
async fn handle_binary_message(
    conn_id: u64,
    data: &[u8],
    state: &BackendState,
    subscriptions: &SubscriptionMap,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let ClientFrame::Request { id, request } = match codec::decode_client(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "failed to decode frame");
            return;
        }
    };

    tracing::debug!(conn_id, request_id = id, request = ?request, "request");

    let response = match request {
        Request::Select(query) => Response::Rows(state.db.select(&query).await),
        Request::Insert(row) => match state.db.insert(row).await {
            Ok(row) => Response::Row(Some(row)),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Update { table, id, patch } => match state.db.update(table, &id, patch).await {
            Ok(row) => Response::Row(row),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Delete { table, id } => Response::Row(state.db.delete(table, &id).await),
        Request::Subscribe { table, filter } => {
            let sub_id = SubscriptionId(state.next_subscription.fetch_add(1, Ordering::Relaxed));
            let mut subs = subscriptions.lock().await;
            subs.insert(sub_id, Subscription { table, filter });
            state.open_subscriptions.fetch_add(1, Ordering::SeqCst);
            tracing::info!(conn_id, subscription = sub_id.0, %table, "subscription opened");
            // Queue the ack while still holding the lock.
            let frame = ServerFrame::Response {
                id,
                response: Response::Subscribed(sub_id),
            };
            queue_frame(tx, &frame);
            drop(subs);
            return;
        }
        Request::Unsubscribe { subscription } => {
            if subscriptions.lock().await.remove(&subscription).is_some() {
                state.open_subscriptions.fetch_sub(1, Ordering::SeqCst);
                tracing::info!(conn_id, subscription = subscription.0, "subscription closed");
            }
            Response::Done
        }
    };

    queue_frame(tx, &ServerFrame::Response { id, response });
}

/// Encodes and queues a frame on the writer channel.
///
/// Returns `false` if the writer has gone away.
fn queue_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) -> bool {
    match codec::encode_server(frame) {
        Ok(bytes) => tx.send(Message::Binary(bytes.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode frame");
            true
        }
    }
}

/// Starts the backend server on the given address with a fresh state.
///
/// Returns the bound address and a join handle for the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BackendState::new())).await
}

/// Starts the backend server with a pre-configured [`BackendState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<BackendState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
