//! Reconciliation between the in-memory board and a [`TaskStore`].
//!
//! Every successful write is followed by a full reload of the owner's tasks;
//! the board is never patched incrementally. In the Remote variant a change
//! feed is opened when the session starts and every notification triggers
//! another full reload.
//!
//! Reloads may overlap. Each one takes a ticket when it starts and its
//! result is applied only if no later-started reload has already been
//! applied, so a slow reload never overwrites a newer board.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use kanban_proto::task::{Comment, Task, TaskId};
use kanban_proto::user::UserId;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::Notification;
use crate::board::Board;
use crate::persistence::TaskStore;
use crate::session::Session;

/// Board plus the ticket of the reload it reflects.
#[derive(Default)]
struct BoardState {
    board: Board,
    applied: u64,
}

struct Inner<S> {
    store: S,
    session: Session,
    state: Mutex<BoardState>,
    next_ticket: AtomicU64,
    in_flight: AtomicUsize,
    revision: watch::Sender<u64>,
}

/// Counts a reload as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives one session's board against a task store.
///
/// Cheap to clone; clones share the same board.
pub struct SyncEngine<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SyncEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TaskStore> SyncEngine<S> {
    /// Creates an engine for `session` with an empty board.
    ///
    /// Nothing is loaded until [`start`](Self::start) or
    /// [`reload`](Self::reload) is called.
    pub fn new(store: S, session: Session) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store,
                session,
                state: Mutex::new(BoardState::default()),
                next_ticket: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                revision,
            }),
        }
    }

    /// The session this engine serves.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    fn owner(&self) -> &UserId {
        self.inner.session.owner()
    }

    /// True while any reload is in flight.
    pub fn loading(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Snapshot of the whole board.
    pub fn board(&self) -> Board {
        self.inner.state.lock().board.clone()
    }

    /// Incomplete tasks in board order.
    pub fn pending(&self) -> Vec<Task> {
        self.inner
            .state
            .lock()
            .board
            .pending()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Completed tasks in board order.
    pub fn completed(&self) -> Vec<Task> {
        self.inner
            .state
            .lock()
            .board
            .completed()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Receiver that changes whenever the board does.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    fn notify(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    /// Reloads the owner's tasks and replaces the board with the result.
    ///
    /// Store errors are logged and leave the board untouched. A result is
    /// discarded if a later-started reload has already been applied.
    pub async fn reload(&self) {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight::enter(&self.inner.in_flight);

        match self.inner.store.load(self.owner()).await {
            Ok(tasks) => {
                if self.apply(ticket, tasks) {
                    self.notify();
                }
            }
            Err(e) => {
                tracing::warn!(owner = %self.owner(), error = %e, "reload failed, keeping board");
            }
        }
    }

    fn apply(&self, ticket: u64, tasks: Vec<Task>) -> bool {
        let mut state = self.inner.state.lock();
        if ticket <= state.applied {
            tracing::debug!(ticket, applied = state.applied, "dropping stale reload");
            return false;
        }
        tracing::debug!(ticket, count = tasks.len(), "board reloaded");
        state.applied = ticket;
        state.board.replace(tasks);
        true
    }

    /// Creates a task and reloads. `None` if the text was blank or the
    /// write failed.
    pub async fn create(&self, text: &str) -> Option<Task> {
        match self.inner.store.create(self.owner(), text).await {
            Ok(Some(task)) => {
                self.reload().await;
                Some(task)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "create failed");
                None
            }
        }
    }

    /// Flips a task's completion and reloads.
    pub async fn toggle(&self, id: TaskId) -> bool {
        match self.inner.store.toggle(self.owner(), id).await {
            Ok(true) => {
                self.reload().await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "toggle failed");
                false
            }
        }
    }

    /// Deletes a task with its comments and reloads.
    pub async fn delete(&self, id: TaskId) -> bool {
        match self.inner.store.delete(self.owner(), id).await {
            Ok(true) => {
                self.reload().await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "delete failed");
                false
            }
        }
    }

    /// Comments on a task as the session user and reloads.
    pub async fn add_comment(&self, task_id: TaskId, text: &str) -> Option<Comment> {
        let author = self.inner.session.user.name.as_str();
        match self
            .inner
            .store
            .add_comment(self.owner(), task_id, author, text)
            .await
        {
            Ok(Some(comment)) => {
                self.reload().await;
                Some(comment)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "add comment failed");
                None
            }
        }
    }

    /// Starts dragging a task. Unknown ids are ignored.
    pub fn drag_start(&self, id: TaskId) -> bool {
        self.inner.state.lock().board.drag_start(id)
    }

    /// Abandons the active drag.
    pub fn cancel_drag(&self) {
        self.inner.state.lock().board.cancel_drag();
    }

    /// Drops the dragged task over `over`.
    ///
    /// A changed order is shown immediately, then handed to the store. If
    /// the store persisted it the board is reloaded from storage.
    pub async fn drag_end(&self, over: Option<TaskId>) -> bool {
        let order = {
            let mut state = self.inner.state.lock();
            if !state.board.drag_end(over) {
                return false;
            }
            state.board.order()
        };
        self.notify();

        match self.inner.store.reorder(self.owner(), &order).await {
            Ok(true) => self.reload().await,
            Ok(false) => tracing::debug!("store has no durable order, keeping local order"),
            Err(e) => tracing::warn!(error = %e, "failed to persist order"),
        }
        true
    }
}

impl<S: TaskStore + 'static> SyncEngine<S> {
    /// Begins the session: opens the change feed, if the store has one,
    /// then performs the initial load.
    ///
    /// The feed is opened first so no change between subscribing and
    /// loading is missed. The returned handle keeps the feed alive.
    pub async fn start(&self) -> SyncHandle {
        let feed = match self.inner.store.watch(self.owner()).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(owner = %self.owner(), error = %e, "failed to open change feed");
                None
            }
        };

        let listener = feed.map(|mut feed| {
            let engine = self.clone();
            tokio::spawn(async move {
                while let Some(notification) = feed.next().await {
                    match &notification {
                        Notification::Change(event) => {
                            tracing::debug!(table = %event.table, kind = ?event.kind, "change received");
                        }
                        Notification::Resync => tracing::info!("change feed resync requested"),
                    }
                    engine.reload().await;
                }
                tracing::info!("change feed ended");
            })
        });

        self.reload().await;
        SyncHandle { listener }
    }
}

/// The live part of a started session.
///
/// Closing or dropping the handle tears down the change feed.
#[derive(Debug)]
pub struct SyncHandle {
    listener: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Whether a change feed is still being listened to.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.listener.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ends the session's change feed.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            tracing::debug!("change feed closed");
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
