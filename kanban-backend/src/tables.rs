//! In-memory relational tables with a row-level change feed.
//!
//! The [`Database`] holds the `users`, `tasks` and `comments` tables behind a
//! single [`RwLock`]. Every successful write is published on a
//! [`broadcast`] channel as a [`ChangeEvent`] while the write lock is still
//! held, so subscribers observe changes in commit order.

use std::time::{SystemTime, UNIX_EPOCH};

use kanban_proto::backend::{
    ChangeEvent, ChangeKind, CommentRow, NewRow, Patch, Query, Row, Table, TaskRow,
    UserRow, Value,
};
use tokio::sync::{RwLock, broadcast};

/// Default capacity of the change feed before slow subscribers lag.
pub const DEFAULT_CHANGE_BUFFER: usize = 1024;

/// Errors returned by table writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    /// A unique column already holds this value.
    #[error("duplicate value for {table}.{column}: {value}")]
    Duplicate {
        table: Table,
        column: &'static str,
        value: String,
    },
    /// A referenced row does not exist.
    #[error("{table}.{column} references a missing row: {value}")]
    ForeignKey {
        table: Table,
        column: &'static str,
        value: String,
    },
    /// The patch does not apply to the target table.
    #[error("patch {patch:?} does not apply to table {table}")]
    InvalidPatch { table: Table, patch: Patch },
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<UserRow>,
    tasks: Vec<TaskRow>,
    comments: Vec<CommentRow>,
    next_task_id: u64,
    next_comment_id: u64,
    last_ms: u64,
}

impl Tables {
    /// Strictly increasing millisecond clock.
    fn tick(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self.last_ms = now.max(self.last_ms + 1);
        self.last_ms
    }

    fn rows(&self, table: Table) -> Vec<Row> {
        match table {
            Table::Users => self.users.iter().cloned().map(Row::User).collect(),
            Table::Tasks => self.tasks.iter().cloned().map(Row::Task).collect(),
            Table::Comments => self.comments.iter().cloned().map(Row::Comment).collect(),
        }
    }
}

/// The in-memory database shared by all connections.
pub struct Database {
    tables: RwLock<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Creates an empty database with the default change feed capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_change_buffer(DEFAULT_CHANGE_BUFFER)
    }

    /// Creates an empty database with a custom change feed capacity.
    #[must_use]
    pub fn with_change_buffer(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            tables: RwLock::new(Tables {
                next_task_id: 1,
                next_comment_id: 1,
                ..Tables::default()
            }),
            changes,
        }
    }

    /// Subscribes to every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn publish(&self, table: Table, kind: ChangeKind, row: Row) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.changes.send(ChangeEvent { table, kind, row });
    }

    /// Runs a select query.
    ///
    /// Rows are ordered by `created_at`, oldest first, ties broken by id.
    pub async fn select(&self, query: &Query) -> Vec<Row> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .rows(query.table)
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| row.matches(f)))
            .collect();
        drop(tables);

        rows.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| id_key(a).cmp(&id_key(b)))
        });
        rows
    }

    /// Inserts a row, assigning its id and `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Duplicate`] for a reused user email and
    /// [`DbError::ForeignKey`] when the owning user or task is missing.
    pub async fn insert(&self, new: NewRow) -> Result<Row, DbError> {
        let mut tables = self.tables.write().await;
        let row = match new {
            NewRow::User { name, email } => {
                if tables.users.iter().any(|u| u.email == email) {
                    return Err(DbError::Duplicate {
                        table: Table::Users,
                        column: "email",
                        value: email,
                    });
                }
                let created_at = tables.tick();
                let user = UserRow {
                    id: uuid::Uuid::now_v7().to_string(),
                    name,
                    email,
                    created_at,
                };
                tables.users.push(user.clone());
                Row::User(user)
            }
            NewRow::Task { user_id, text } => {
                if !tables.users.iter().any(|u| u.id == user_id) {
                    return Err(DbError::ForeignKey {
                        table: Table::Tasks,
                        column: "user_id",
                        value: user_id,
                    });
                }
                let created_at = tables.tick();
                let id = tables.next_task_id;
                tables.next_task_id += 1;
                let task = TaskRow {
                    id,
                    user_id,
                    text,
                    completed: false,
                    created_at,
                };
                tables.tasks.push(task.clone());
                Row::Task(task)
            }
            NewRow::Comment {
                task_id,
                author_name,
                text,
            } => {
                if !tables.tasks.iter().any(|t| t.id == task_id) {
                    return Err(DbError::ForeignKey {
                        table: Table::Comments,
                        column: "task_id",
                        value: task_id.to_string(),
                    });
                }
                let created_at = tables.tick();
                let id = tables.next_comment_id;
                tables.next_comment_id += 1;
                let comment = CommentRow {
                    id,
                    task_id,
                    author_name,
                    text,
                    created_at,
                };
                tables.comments.push(comment.clone());
                Row::Comment(comment)
            }
        };

        tracing::debug!(table = %row.table(), "row inserted");
        self.publish(row.table(), ChangeKind::Insert, row.clone());
        drop(tables);
        Ok(row)
    }

    /// Applies `patch` to the row with primary key `id`.
    ///
    /// Returns the updated row, or `None` if no row has that id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidPatch`] if the patch targets another table.
    pub async fn update(
        &self,
        table: Table,
        id: &Value,
        patch: Patch,
    ) -> Result<Option<Row>, DbError> {
        let Patch::TaskCompleted(completed) = patch;
        if table != Table::Tasks {
            return Err(DbError::InvalidPatch { table, patch });
        }
        let Value::Int(id) = *id else {
            return Ok(None);
        };

        let mut tables = self.tables.write().await;
        let Some(task) = tables.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        task.completed = completed;
        let row = Row::Task(task.clone());
        self.publish(Table::Tasks, ChangeKind::Update, row.clone());
        drop(tables);
        Ok(Some(row))
    }

    /// Deletes the row with primary key `id`, cascading to dependent rows.
    ///
    /// Deleting a user removes their tasks; deleting a task removes its
    /// comments. One delete event is published per removed row, dependents
    /// first. Returns the deleted row, or `None` if absent.
    pub async fn delete(&self, table: Table, id: &Value) -> Option<Row> {
        let mut tables = self.tables.write().await;
        let deleted = match (table, id) {
            (Table::Users, Value::Text(id)) => {
                let index = tables.users.iter().position(|u| &u.id == id)?;
                let owned: Vec<u64> = tables
                    .tasks
                    .iter()
                    .filter(|t| &t.user_id == id)
                    .map(|t| t.id)
                    .collect();
                for task_id in owned {
                    self.delete_task(&mut tables, task_id);
                }
                let user = tables.users.remove(index);
                self.publish(Table::Users, ChangeKind::Delete, Row::User(user.clone()));
                Row::User(user)
            }
            (Table::Tasks, Value::Int(id)) => self.delete_task(&mut tables, *id)?,
            (Table::Comments, Value::Int(id)) => {
                let index = tables.comments.iter().position(|c| c.id == *id)?;
                let comment = tables.comments.remove(index);
                let row = Row::Comment(comment);
                self.publish(Table::Comments, ChangeKind::Delete, row.clone());
                row
            }
            _ => return None,
        };
        drop(tables);
        tracing::debug!(table = %table, "row deleted");
        Some(deleted)
    }

    fn delete_task(&self, tables: &mut Tables, task_id: u64) -> Option<Row> {
        let index = tables.tasks.iter().position(|t| t.id == task_id)?;
        let (removed, kept): (Vec<CommentRow>, Vec<CommentRow>) = std::mem::take(&mut tables.comments)
            .into_iter()
            .partition(|c| c.task_id == task_id);
        tables.comments = kept;
        for comment in removed {
            self.publish(Table::Comments, ChangeKind::Delete, Row::Comment(comment));
        }
        let task = Row::Task(tables.tasks.remove(index));
        self.publish(Table::Tasks, ChangeKind::Delete, task.clone());
        Some(task)
    }
}

fn id_key(row: &Row) -> (u64, String) {
    match row.id() {
        Value::Int(n) => (n, String::new()),
        Value::Text(s) => (0, s),
    }
}
