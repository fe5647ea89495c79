//! Task persistence.
//!
//! Defines the [`TaskStore`] trait the sync engine writes through, with two
//! implementations that share one observable contract:
//! - [`local::LocalTaskStore`]: whole-list JSON documents in the local key space
//! - [`remote::RemoteTaskStore`]: rows in the hosted relational backend
//!
//! Blank text and absent ids are silent no-ops in both: `create` and
//! `add_comment` return `None`, `toggle` and `delete` return `false`.

pub mod local;
pub mod remote;

use kanban_proto::task::{Comment, Task, TaskId};
use kanban_proto::user::UserId;

use crate::backend::{BackendError, Notification, Subscription};
use crate::storage::StorageError;

/// Errors that can occur in a task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The local key space failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The remote backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A task list could not be encoded for storage.
    #[error("failed to encode task list: {0}")]
    Encode(#[from] serde_json::Error),

    /// No id above the largest stored one is left to hand out.
    #[error("no ids left to allocate")]
    IdsExhausted,
}

/// Async task storage scoped per owner.
///
/// Every operation takes the owning user; tasks of other owners are
/// invisible and cannot be modified.
pub trait TaskStore: Send + Sync {
    /// Load all of `owner`'s tasks with their comments, in board order.
    fn load(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Create a task. `None` if `text` is blank.
    fn create(
        &self,
        owner: &UserId,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Flip a task's completion. `false` if the task does not exist.
    fn toggle(
        &self,
        owner: &UserId,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Delete a task and its comments. `false` if the task does not exist.
    fn delete(
        &self,
        owner: &UserId,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Append a comment. `None` if `text` is blank or the task does not exist.
    fn add_comment(
        &self,
        owner: &UserId,
        task_id: TaskId,
        author_name: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Option<Comment>, StoreError>> + Send;

    /// Persist a new board order. `false` if this store has no durable order.
    fn reorder(
        &self,
        owner: &UserId,
        order: &[TaskId],
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Open the realtime change feed for `owner`, if this store has one.
    fn watch(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<ChangeFeed>, StoreError>> + Send;
}

impl<T: TaskStore + ?Sized> TaskStore for std::sync::Arc<T> {
    fn load(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, StoreError>> + Send {
        (**self).load(owner)
    }

    fn create(
        &self,
        owner: &UserId,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Option<Task>, StoreError>> + Send {
        (**self).create(owner, text)
    }

    fn toggle(
        &self,
        owner: &UserId,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send {
        (**self).toggle(owner, id)
    }

    fn delete(
        &self,
        owner: &UserId,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send {
        (**self).delete(owner, id)
    }

    fn add_comment(
        &self,
        owner: &UserId,
        task_id: TaskId,
        author_name: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Option<Comment>, StoreError>> + Send {
        (**self).add_comment(owner, task_id, author_name, text)
    }

    fn reorder(
        &self,
        owner: &UserId,
        order: &[TaskId],
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send {
        (**self).reorder(owner, order)
    }

    fn watch(
        &self,
        owner: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<ChangeFeed>, StoreError>> + Send {
        (**self).watch(owner)
    }
}

/// The subscription pair behind a realtime session: the owner's tasks and
/// all comments. Both are closed when the feed is dropped.
#[derive(Debug)]
pub struct ChangeFeed {
    tasks: Subscription,
    comments: Subscription,
}

impl ChangeFeed {
    /// Pairs a task subscription with a comment subscription.
    #[must_use]
    pub fn new(tasks: Subscription, comments: Subscription) -> Self {
        Self { tasks, comments }
    }

    /// Waits for the next notification on either table.
    ///
    /// Returns `None` once either subscription has ended.
    pub async fn next(&mut self) -> Option<Notification> {
        tokio::select! {
            event = self.tasks.recv() => event,
            event = self.comments.recv() => event,
        }
    }

    /// Closes both subscriptions.
    pub fn close(self) {
        let Self { tasks, comments } = self;
        tasks.close();
        comments.close();
    }
}
