//! Task and comment entity model.
//!
//! These are the in-memory shapes every storage variant converts into.
//! A [`Task`] owns its [`Comment`]s in creation order; both carry
//! millisecond timestamps that are used for ordering only.

use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// Identifier of a task.
///
/// Local storage assigns these per user from a monotonically increasing
/// counter; the hosted backend assigns them globally at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw numeric id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(u64);

impl CommentId {
    /// Wraps a raw numeric id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A comment attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique comment identifier.
    pub id: CommentId,
    /// Task this comment belongs to.
    pub task_id: TaskId,
    /// Display name of the commenting user (denormalized, not a user reference).
    pub author_name: String,
    /// Comment body, always trimmed and non-empty.
    pub text: String,
    /// Milliseconds since epoch; used only for ordering.
    pub created_at: u64,
}

/// A task on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable task identifier.
    pub id: TaskId,
    /// User this task belongs to.
    pub owner_id: UserId,
    /// Task text, always trimmed and non-empty.
    pub text: String,
    /// Whether the task has been completed.
    pub completed: bool,
    /// Comments ordered by `created_at` ascending.
    pub comments: Vec<Comment>,
    /// Milliseconds since epoch when the task was created.
    pub created_at: u64,
}

impl Task {
    /// Creates a new incomplete task with no comments.
    ///
    /// Returns `None` if `text` is blank; otherwise the stored text is trimmed.
    #[must_use]
    pub fn new(id: TaskId, owner_id: UserId, text: &str, created_at: u64) -> Option<Self> {
        let text = normalize_text(text)?;
        Some(Self {
            id,
            owner_id,
            text,
            completed: false,
            comments: Vec::new(),
            created_at,
        })
    }

    /// Restores the comment ordering invariant (ascending `created_at`, ties by id).
    pub fn sort_comments(&mut self) {
        self.comments.sort_by_key(|c| (c.created_at, c.id));
    }

    /// Returns `true` if the comments are in ascending creation order.
    #[must_use]
    pub fn comments_sorted(&self) -> bool {
        self.comments
            .windows(2)
            .all(|pair| (pair[0].created_at, pair[0].id) <= (pair[1].created_at, pair[1].id))
    }
}

/// Returns `true` if `text` would be accepted as task or comment content.
#[must_use]
pub fn is_creatable(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Trims `text`, returning `None` when nothing is left.
#[must_use]
pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
