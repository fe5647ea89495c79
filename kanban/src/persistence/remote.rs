//! Task store backed by the hosted relational backend.
//!
//! Tasks are rows of `tasks` filtered by `user_id` and ordered by
//! `created_at`; comments are rows of `comments` fetched per task. There is
//! no position column, so drag order is not durable here.

use futures_util::future::join_all;
use kanban_proto::backend::{
    Column, CommentRow, Filter, NewRow, Patch, Query, Row, Table, TaskRow, Value,
};
use kanban_proto::task::{Comment, CommentId, Task, TaskId, normalize_text};
use kanban_proto::user::UserId;

use super::{ChangeFeed, StoreError, TaskStore};
use crate::backend::{Backend, BackendError};

fn task_from_row(row: TaskRow, comments: Vec<Comment>) -> Task {
    let mut task = Task {
        id: TaskId::new(row.id),
        owner_id: UserId::new(row.user_id),
        text: row.text,
        completed: row.completed,
        comments,
        created_at: row.created_at,
    };
    task.sort_comments();
    task
}

fn comment_from_row(row: CommentRow) -> Comment {
    Comment {
        id: CommentId::new(row.id),
        task_id: TaskId::new(row.task_id),
        author_name: row.author_name,
        text: row.text,
        created_at: row.created_at,
    }
}

fn expect_task(row: Row) -> Result<TaskRow, BackendError> {
    match row {
        Row::Task(task) => Ok(task),
        other => Err(BackendError::UnexpectedResponse(format!(
            "expected task row, got {other:?}"
        ))),
    }
}

fn expect_comment(row: Row) -> Result<CommentRow, BackendError> {
    match row {
        Row::Comment(comment) => Ok(comment),
        other => Err(BackendError::UnexpectedResponse(format!(
            "expected comment row, got {other:?}"
        ))),
    }
}

/// [`TaskStore`] over a [`Backend`].
pub struct RemoteTaskStore<B> {
    backend: B,
}

impl<B: Backend> RemoteTaskStore<B> {
    /// Creates a store over `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Fetches `owner`'s task row `id`, if it exists.
    async fn owned_task(&self, owner: &UserId, id: TaskId) -> Result<Option<TaskRow>, StoreError> {
        let rows = self
            .backend
            .select(
                Query::all(Table::Tasks)
                    .filter(Column::Id, Value::Int(id.get()))
                    .filter(Column::UserId, Value::Text(owner.as_str().to_string())),
            )
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(expect_task(row)?)),
            None => Ok(None),
        }
    }

    /// Fetches a task's comments. A failure degrades to no comments for
    /// this task only.
    async fn comments_for(&self, task_id: u64) -> Vec<Comment> {
        let query = Query::all(Table::Comments).filter(Column::TaskId, Value::Int(task_id));
        match self.backend.select(query).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| match expect_comment(row) {
                    Ok(c) => Some(comment_from_row(c)),
                    Err(e) => {
                        tracing::warn!(task_id, error = %e, "skipping malformed comment row");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "failed to load comments, showing none");
                Vec::new()
            }
        }
    }
}

impl<B: Backend> TaskStore for RemoteTaskStore<B> {
    async fn load(&self, owner: &UserId) -> Result<Vec<Task>, StoreError> {
        let rows = self
            .backend
            .select(
                Query::all(Table::Tasks)
                    .filter(Column::UserId, Value::Text(owner.as_str().to_string())),
            )
            .await?;
        let rows = rows
            .into_iter()
            .map(expect_task)
            .collect::<Result<Vec<_>, _>>()?;

        let comments = join_all(rows.iter().map(|row| self.comments_for(row.id))).await;

        Ok(rows
            .into_iter()
            .zip(comments)
            .map(|(row, comments)| task_from_row(row, comments))
            .collect())
    }

    async fn create(&self, owner: &UserId, text: &str) -> Result<Option<Task>, StoreError> {
        let Some(text) = normalize_text(text) else {
            return Ok(None);
        };
        let row = self
            .backend
            .insert(NewRow::Task {
                user_id: owner.as_str().to_string(),
                text,
            })
            .await?;
        let task = task_from_row(expect_task(row)?, Vec::new());
        tracing::debug!(owner = %owner, task_id = %task.id, "task created");
        Ok(Some(task))
    }

    async fn toggle(&self, owner: &UserId, id: TaskId) -> Result<bool, StoreError> {
        let Some(row) = self.owned_task(owner, id).await? else {
            return Ok(false);
        };
        let updated = self
            .backend
            .update(
                Table::Tasks,
                Value::Int(row.id),
                Patch::TaskCompleted(!row.completed),
            )
            .await?;
        Ok(updated.is_some())
    }

    async fn delete(&self, owner: &UserId, id: TaskId) -> Result<bool, StoreError> {
        if self.owned_task(owner, id).await?.is_none() {
            return Ok(false);
        }
        // Comments go with the task through the backend's cascade.
        let deleted = self
            .backend
            .delete(Table::Tasks, Value::Int(id.get()))
            .await?;
        Ok(deleted.is_some())
    }

    async fn add_comment(
        &self,
        owner: &UserId,
        task_id: TaskId,
        author_name: &str,
        text: &str,
    ) -> Result<Option<Comment>, StoreError> {
        let Some(text) = normalize_text(text) else {
            return Ok(None);
        };
        if self.owned_task(owner, task_id).await?.is_none() {
            return Ok(None);
        }
        let row = self
            .backend
            .insert(NewRow::Comment {
                task_id: task_id.get(),
                author_name: author_name.to_string(),
                text,
            })
            .await?;
        Ok(Some(comment_from_row(expect_comment(row)?)))
    }

    async fn reorder(&self, owner: &UserId, _order: &[TaskId]) -> Result<bool, StoreError> {
        tracing::debug!(owner = %owner, "remote order is not durable, reorder ignored");
        Ok(false)
    }

    async fn watch(&self, owner: &UserId) -> Result<Option<ChangeFeed>, StoreError> {
        let tasks = self
            .backend
            .subscribe(
                Table::Tasks,
                Some(Filter::eq(
                    Column::UserId,
                    Value::Text(owner.as_str().to_string()),
                )),
            )
            .await?;
        let comments = self.backend.subscribe(Table::Comments, None).await?;
        tracing::info!(owner = %owner, "realtime feed opened");
        Ok(Some(ChangeFeed::new(tasks, comments)))
    }
}
