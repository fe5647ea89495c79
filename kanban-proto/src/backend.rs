//! Wire protocol between the client and the hosted relational backend.
//!
//! The backend exposes three tables (`users`, `tasks`, `comments`) with
//! equality filters, ascending order on `created_at`,
//! insert-returning, update/delete by id, and a per-table change feed.
//!
//! Every WebSocket binary message carries exactly one postcard-encoded
//! frame: [`ClientFrame`] upstream, [`ServerFrame`] downstream. Requests
//! carry a client-chosen id that the server echoes in its response.

use serde::{Deserialize, Serialize};

/// Tables exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    /// `users(id, name, email, created_at)`
    Users,
    /// `tasks(id, user_id, text, completed, created_at)`
    Tasks,
    /// `comments(id, task_id, author_name, text, created_at)`
    Comments,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Users => "users",
            Self::Tasks => "tasks",
            Self::Comments => "comments",
        };
        f.write_str(name)
    }
}

/// Filterable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    /// Primary key of any table.
    Id,
    /// `tasks.user_id`
    UserId,
    /// `comments.task_id`
    TaskId,
    /// `users.email`
    Email,
}

/// A scalar column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Text column (user ids, emails).
    Text(String),
    /// Integer column (task and comment ids).
    Int(u64),
}

/// Equality filter `column = value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Column to compare.
    pub column: Column,
    /// Value the column must equal.
    pub value: Value,
}

impl Filter {
    /// Shorthand for `column = value`.
    #[must_use]
    pub const fn eq(column: Column, value: Value) -> Self {
        Self { column, value }
    }
}

/// A select query: all filters must match. Results come back oldest
/// first by `created_at`, ties broken by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Table to read.
    pub table: Table,
    /// Conjunction of equality filters.
    pub filters: Vec<Filter>,
}

impl Query {
    /// Selects every row of `table` in ascending creation order.
    #[must_use]
    pub const fn all(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
        }
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter(mut self, column: Column, value: Value) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }
}

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: u64,
}

/// A row of the `tasks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: u64,
    pub user_id: String,
    pub text: String,
    pub completed: bool,
    pub created_at: u64,
}

/// A row of the `comments` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: u64,
    pub task_id: u64,
    pub author_name: String,
    pub text: String,
    pub created_at: u64,
}

/// A row from any table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Row {
    User(UserRow),
    Task(TaskRow),
    Comment(CommentRow),
}

impl Row {
    /// Table this row belongs to.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::User(_) => Table::Users,
            Self::Task(_) => Table::Tasks,
            Self::Comment(_) => Table::Comments,
        }
    }

    /// Primary key of this row.
    #[must_use]
    pub fn id(&self) -> Value {
        match self {
            Self::User(u) => Value::Text(u.id.clone()),
            Self::Task(t) => Value::Int(t.id),
            Self::Comment(c) => Value::Int(c.id),
        }
    }

    /// Creation timestamp in milliseconds.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        match self {
            Self::User(u) => u.created_at,
            Self::Task(t) => t.created_at,
            Self::Comment(c) => c.created_at,
        }
    }

    /// Returns the value of `column`, or `None` if this table has no such column.
    #[must_use]
    pub fn column(&self, column: Column) -> Option<Value> {
        match (self, column) {
            (_, Column::Id) => Some(self.id()),
            (Self::User(u), Column::Email) => Some(Value::Text(u.email.clone())),
            (Self::Task(t), Column::UserId) => Some(Value::Text(t.user_id.clone())),
            (Self::Comment(c), Column::TaskId) => Some(Value::Int(c.task_id)),
            _ => None,
        }
    }

    /// Returns `true` if the row satisfies `filter`.
    ///
    /// A filter on a column the table lacks never matches.
    #[must_use]
    pub fn matches(&self, filter: &Filter) -> bool {
        self.column(filter.column)
            .is_some_and(|value| value == filter.value)
    }
}

/// Values for a row to insert. Ids and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewRow {
    User {
        name: String,
        email: String,
    },
    Task {
        user_id: String,
        text: String,
    },
    Comment {
        task_id: u64,
        author_name: String,
        text: String,
    },
}

impl NewRow {
    /// Table this row will be inserted into.
    #[must_use]
    pub const fn table(&self) -> Table {
        match self {
            Self::User { .. } => Table::Users,
            Self::Task { .. } => Table::Tasks,
            Self::Comment { .. } => Table::Comments,
        }
    }
}

/// Column updates supported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Patch {
    /// `UPDATE tasks SET completed = ?`
    TaskCompleted(bool),
}

/// Identifier of a change subscription, unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// A request from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Read rows. Answered with [`Response::Rows`].
    Select(Query),
    /// Insert a row. Answered with [`Response::Row`] holding the stored row.
    Insert(NewRow),
    /// Update a row by id. Answered with [`Response::Row`], `None` if absent.
    Update {
        table: Table,
        id: Value,
        patch: Patch,
    },
    /// Delete a row by id. Answered with [`Response::Row`], `None` if absent.
    Delete { table: Table, id: Value },
    /// Open a change feed on `table`, optionally filtered.
    /// Answered with [`Response::Subscribed`] before any change is delivered.
    Subscribe {
        table: Table,
        filter: Option<Filter>,
    },
    /// Close a change feed. Answered with [`Response::Done`].
    Unsubscribe { subscription: SubscriptionId },
}

/// A response from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Subscribed(SubscriptionId),
    Done,
    /// The request failed; the message is human-readable.
    Error(String),
}

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// The row after the change (before it, for deletes).
    pub row: Row,
}

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    Request { id: u64, request: Request },
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Answer to the request with the same id.
    Response { id: u64, response: Response },
    /// A change matching an open subscription.
    Change {
        subscription: SubscriptionId,
        event: ChangeEvent,
    },
    /// Changes for this subscription were dropped; the client should
    /// reload whatever it derives from the table.
    Resync { subscription: SubscriptionId },
}
