//! Client side of the hosted relational backend.
//!
//! Defines the [`Backend`] trait the remote task store and remote identity
//! provider are written against. Concrete implementations:
//! - [`ws::WsBackend`]: WebSocket connection to a running backend server

pub mod ws;

use kanban_proto::backend::{
    ChangeEvent, Filter, NewRow, Patch, Query, Row, SubscriptionId, Table, Value,
};
use kanban_proto::codec::CodecError;
use tokio::sync::mpsc;

/// What a [`Subscription`] delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// One committed row change.
    Change(ChangeEvent),
    /// The server fell behind and dropped changes; reload the table.
    Resync,
}

/// Errors that can occur while talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The connection to the backend has been closed.
    #[error("backend connection closed")]
    ConnectionClosed,

    /// The backend did not answer in time.
    #[error("backend request timed out")]
    Timeout,

    /// The backend could not be reached.
    #[error("backend at {0} is unreachable")]
    Unreachable(String),

    /// The backend rejected the request.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// The backend answered with a response of the wrong shape.
    #[error("unexpected backend response: {0}")]
    UnexpectedResponse(String),

    /// A frame could not be encoded or decoded.
    #[error("backend codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async access to the relational backend.
///
/// Mirrors the consumed contract: equality-filtered selects ordered by
/// `created_at`, insert-returning, update/delete by id, and per-table
/// change subscriptions.
pub trait Backend: Send + Sync {
    /// Run a select query.
    fn select(
        &self,
        query: Query,
    ) -> impl std::future::Future<Output = Result<Vec<Row>, BackendError>> + Send;

    /// Insert a row and return it as stored.
    fn insert(
        &self,
        row: NewRow,
    ) -> impl std::future::Future<Output = Result<Row, BackendError>> + Send;

    /// Update a row by id. `None` means no row had that id.
    fn update(
        &self,
        table: Table,
        id: Value,
        patch: Patch,
    ) -> impl std::future::Future<Output = Result<Option<Row>, BackendError>> + Send;

    /// Delete a row by id. `None` means no row had that id.
    fn delete(
        &self,
        table: Table,
        id: Value,
    ) -> impl std::future::Future<Output = Result<Option<Row>, BackendError>> + Send;

    /// Open a change subscription on `table`.
    ///
    /// Every change committed after this returns is delivered. Dropping
    /// the [`Subscription`] closes it.
    fn subscribe(
        &self,
        table: Table,
        filter: Option<Filter>,
    ) -> impl std::future::Future<Output = Result<Subscription, BackendError>> + Send;
}

impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    fn select(
        &self,
        query: Query,
    ) -> impl std::future::Future<Output = Result<Vec<Row>, BackendError>> + Send {
        (**self).select(query)
    }

    fn insert(
        &self,
        row: NewRow,
    ) -> impl std::future::Future<Output = Result<Row, BackendError>> + Send {
        (**self).insert(row)
    }

    fn update(
        &self,
        table: Table,
        id: Value,
        patch: Patch,
    ) -> impl std::future::Future<Output = Result<Option<Row>, BackendError>> + Send {
        (**self).update(table, id, patch)
    }

    fn delete(
        &self,
        table: Table,
        id: Value,
    ) -> impl std::future::Future<Output = Result<Option<Row>, BackendError>> + Send {
        (**self).delete(table, id)
    }

    fn subscribe(
        &self,
        table: Table,
        filter: Option<Filter>,
    ) -> impl std::future::Future<Output = Result<Subscription, BackendError>> + Send {
        (**self).subscribe(table, filter)
    }
}

type CloseHook = Box<dyn FnOnce() + Send + Sync>;

/// A live change subscription.
///
/// Events arrive in commit order. The subscription is torn down on
/// [`Subscription::close`] or drop; after the connection is lost,
/// [`Subscription::recv`] returns `None`.
pub struct Subscription {
    id: SubscriptionId,
    table: Table,
    events: mpsc::UnboundedReceiver<Notification>,
    on_close: Option<CloseHook>,
}

impl Subscription {
    /// Wraps an event channel with a teardown hook run exactly once.
    pub fn new(
        id: SubscriptionId,
        table: Table,
        events: mpsc::UnboundedReceiver<Notification>,
        on_close: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            table,
            events,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Server-assigned subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Table this subscription watches.
    #[must_use]
    pub const fn table(&self) -> Table {
        self.table
    }

    /// Waits for the next notification. `None` once the subscription is dead.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.events.recv().await
    }

    /// Closes the subscription.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(hook) = self.on_close.take() {
            tracing::debug!(subscription = self.id.0, table = %self.table, "closing subscription");
            hook();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
