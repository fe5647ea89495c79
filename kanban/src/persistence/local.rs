//! Task store backed by the local key space.
//!
//! Each owner's tasks live under `tasks_<owner>` as one JSON array in board
//! order, in the same shape the browser client writes:
//!
//! ```json
//! [{"id":1,"text":"Buy milk","completed":false,
//!   "comments":[{"id":1700000000000,"author":"Taro","text":"2L","timestamp":1700000000000}]}]
//! ```
//!
//! Records from older clients may lack `comments` (or carry `null`) and
//! `createdAt`; loading fills them in. Every mutation rewrites the whole
//! array. A corrupt document reads as an empty list.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use kanban_proto::task::{Comment, CommentId, Task, TaskId, normalize_text};
use kanban_proto::user::UserId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ChangeFeed, StoreError, TaskStore};
use crate::storage::KeyValueStore;

/// Key holding `owner`'s task list.
#[must_use]
pub fn tasks_key(owner: &UserId) -> String {
    format!("tasks_{owner}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredComment {
    id: u64,
    author: String,
    text: String,
    timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTask {
    id: u64,
    text: String,
    completed: bool,
    #[serde(default)]
    comments: Option<Vec<StoredComment>>,
    #[serde(default, rename = "createdAt")]
    created_at: u64,
}

impl StoredTask {
    fn into_task(self, owner: &UserId) -> Task {
        let task_id = TaskId::new(self.id);
        let mut task = Task {
            id: task_id,
            owner_id: owner.clone(),
            text: self.text,
            completed: self.completed,
            comments: self
                .comments
                .unwrap_or_default()
                .into_iter()
                .map(|c| Comment {
                    id: CommentId::new(c.id),
                    task_id,
                    author_name: c.author,
                    text: c.text,
                    created_at: c.timestamp,
                })
                .collect(),
            created_at: self.created_at,
        };
        task.sort_comments();
        task
    }
}

/// Fills in fields older clients did not write. Idempotent.
fn migrate(tasks: &mut [StoredTask]) {
    for task in tasks {
        if task.comments.is_none() {
            task.comments = Some(Vec::new());
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// [`TaskStore`] over a [`KeyValueStore`].
///
/// Completes without suspending. Mutations for all owners are serialized
/// through one lock so concurrent read-modify-write cycles cannot lose
/// updates.
pub struct LocalTaskStore<K> {
    kv: K,
    /// Next task id per owner. Never moves backwards, even after the
    /// highest task is deleted.
    next_ids: Mutex<HashMap<UserId, u64>>,
    write_lock: Mutex<()>,
}

impl<K: KeyValueStore> LocalTaskStore<K> {
    /// Creates a store over `kv`.
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            next_ids: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Reads and migrates `owner`'s task list.
    fn read(&self, owner: &UserId) -> Result<Vec<StoredTask>, StoreError> {
        let key = tasks_key(owner);
        let Some(raw) = self.kv.get(&key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<StoredTask>>(&raw) {
            Ok(mut tasks) => {
                migrate(&mut tasks);
                Ok(tasks)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt task list, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, owner: &UserId, tasks: &[StoredTask]) -> Result<(), StoreError> {
        let json = serde_json::to_string(tasks)?;
        self.kv.set(&tasks_key(owner), &json)?;
        Ok(())
    }

    /// Runs `f` over `owner`'s list and writes the list back if `f`
    /// reports a change.
    fn modify<R>(
        &self,
        owner: &UserId,
        f: impl FnOnce(&mut Vec<StoredTask>) -> Option<R>,
    ) -> Result<Option<R>, StoreError> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.read(owner)?;
        let Some(result) = f(&mut tasks) else {
            return Ok(None);
        };
        self.write(owner, &tasks)?;
        Ok(Some(result))
    }

    /// Allocates the next task id for `owner`, or `None` once the id space
    /// above the largest stored id is used up.
    fn allocate_id(&self, owner: &UserId, existing: &[StoredTask]) -> Option<u64> {
        let max_existing = existing.iter().map(|t| t.id).max().unwrap_or(0);
        let mut next_ids = self.next_ids.lock();
        let next = next_ids.entry(owner.clone()).or_insert(1);
        let id = (*next).max(max_existing.checked_add(1)?);
        *next = id.saturating_add(1);
        Some(id)
    }

    fn create_sync(&self, owner: &UserId, text: &str) -> Result<Option<Task>, StoreError> {
        let Some(text) = normalize_text(text) else {
            return Ok(None);
        };
        let mut exhausted = false;
        let created = self.modify(owner, |tasks| {
            let Some(id) = self.allocate_id(owner, tasks) else {
                exhausted = true;
                return None;
            };
            let stored = StoredTask {
                id,
                text,
                completed: false,
                comments: Some(Vec::new()),
                created_at: now_ms(),
            };
            tasks.push(stored.clone());
            Some(stored)
        })?;
        if exhausted {
            tracing::warn!(owner = %owner, "task ids exhausted, create rejected");
            return Err(StoreError::IdsExhausted);
        }
        let task = created.map(|stored| stored.into_task(owner));
        if let Some(task) = &task {
            tracing::debug!(owner = %owner, task_id = %task.id, "task created");
        }
        Ok(task)
    }

    fn toggle_sync(&self, owner: &UserId, id: TaskId) -> Result<bool, StoreError> {
        let toggled = self.modify(owner, |tasks| {
            let task = tasks.iter_mut().find(|t| t.id == id.get())?;
            task.completed = !task.completed;
            Some(())
        })?;
        Ok(toggled.is_some())
    }

    fn delete_sync(&self, owner: &UserId, id: TaskId) -> Result<bool, StoreError> {
        let deleted = self.modify(owner, |tasks| {
            let index = tasks.iter().position(|t| t.id == id.get())?;
            tasks.remove(index);
            Some(())
        })?;
        Ok(deleted.is_some())
    }

    fn add_comment_sync(
        &self,
        owner: &UserId,
        task_id: TaskId,
        author_name: &str,
        text: &str,
    ) -> Result<Option<Comment>, StoreError> {
        let Some(text) = normalize_text(text) else {
            return Ok(None);
        };
        let mut exhausted = false;
        let added = self.modify(owner, |tasks| {
            let task = tasks.iter_mut().find(|t| t.id == task_id.get())?;
            let comments = task.comments.get_or_insert_with(Vec::new);
            let now = now_ms();
            // Timestamp-derived ids, bumped to stay unique within the task.
            let floor = match comments.iter().map(|c| c.id).max() {
                Some(max) => max.checked_add(1),
                None => Some(now),
            };
            let Some(floor) = floor else {
                exhausted = true;
                return None;
            };
            let id = floor.max(now);
            let timestamp = comments
                .iter()
                .map(|c| c.timestamp)
                .max()
                .map_or(now, |last| last.max(now));
            let stored = StoredComment {
                id,
                author: author_name.to_string(),
                text,
                timestamp,
            };
            comments.push(stored.clone());
            Some(stored)
        })?;
        if exhausted {
            tracing::warn!(owner = %owner, task_id = %task_id, "comment ids exhausted, comment rejected");
            return Err(StoreError::IdsExhausted);
        }
        Ok(added.map(|c| Comment {
            id: CommentId::new(c.id),
            task_id,
            author_name: c.author,
            text: c.text,
            created_at: c.timestamp,
        }))
    }

    fn reorder_sync(&self, owner: &UserId, order: &[TaskId]) -> Result<bool, StoreError> {
        self.modify(owner, |tasks| {
            let mut remaining = std::mem::take(tasks);
            for id in order {
                if let Some(index) = remaining.iter().position(|t| t.id == id.get()) {
                    tasks.push(remaining.remove(index));
                }
            }
            // Tasks missing from `order` keep their relative order at the end.
            tasks.append(&mut remaining);
            Some(())
        })
        .map(|r| r.is_some())
    }
}

impl<K: KeyValueStore> TaskStore for LocalTaskStore<K> {
    async fn load(&self, owner: &UserId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .read(owner)?
            .into_iter()
            .map(|t| t.into_task(owner))
            .collect())
    }

    async fn create(&self, owner: &UserId, text: &str) -> Result<Option<Task>, StoreError> {
        self.create_sync(owner, text)
    }

    async fn toggle(&self, owner: &UserId, id: TaskId) -> Result<bool, StoreError> {
        self.toggle_sync(owner, id)
    }

    async fn delete(&self, owner: &UserId, id: TaskId) -> Result<bool, StoreError> {
        self.delete_sync(owner, id)
    }

    async fn add_comment(
        &self,
        owner: &UserId,
        task_id: TaskId,
        author_name: &str,
        text: &str,
    ) -> Result<Option<Comment>, StoreError> {
        self.add_comment_sync(owner, task_id, author_name, text)
    }

    async fn reorder(&self, owner: &UserId, order: &[TaskId]) -> Result<bool, StoreError> {
        self.reorder_sync(owner, order)
    }

    async fn watch(&self, _owner: &UserId) -> Result<Option<ChangeFeed>, StoreError> {
        Ok(None)
    }
}
