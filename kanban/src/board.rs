//! In-memory board: the canonical task sequence plus drag state.
//!
//! The board never talks to storage. The sync engine replaces its contents
//! after each reload and persists the order after a drag that moved a task.

use kanban_proto::task::{Task, TaskId};

/// Canonical ordered task list and the active drag, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    tasks: Vec<Task>,
    active: Option<TaskId>,
}

impl Board {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a board showing `tasks` in the given order.
    #[must_use]
    pub const fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            active: None,
        }
    }

    /// All tasks in board order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Task ids in board order.
    #[must_use]
    pub fn order(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    /// Incomplete tasks, in board order.
    #[must_use]
    pub fn pending(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| !t.completed).collect()
    }

    /// Completed tasks, in board order.
    #[must_use]
    pub fn completed(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.completed).collect()
    }

    /// The task currently being dragged.
    #[must_use]
    pub const fn active(&self) -> Option<TaskId> {
        self.active
    }

    fn index_of(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Starts dragging `id`. Unknown ids are ignored; returns whether a
    /// drag is now active for `id`.
    pub fn drag_start(&mut self, id: TaskId) -> bool {
        if self.index_of(id).is_none() {
            return false;
        }
        self.active = Some(id);
        true
    }

    /// Ends the active drag over `over`.
    ///
    /// If `over` is a known task other than the dragged one, the dragged
    /// task is removed from its index and inserted at `over`'s index.
    /// Returns whether the order changed.
    pub fn drag_end(&mut self, over: Option<TaskId>) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        let Some(over) = over else {
            return false;
        };
        if over == active {
            return false;
        }
        let (Some(from), Some(to)) = (self.index_of(active), self.index_of(over)) else {
            return false;
        };
        let task = self.tasks.remove(from);
        self.tasks.insert(to, task);
        true
    }

    /// Abandons the active drag without moving anything.
    pub const fn cancel_drag(&mut self) {
        self.active = None;
    }

    /// Replaces the sequence with a fresh reload result.
    ///
    /// A drag whose task is no longer present is cancelled.
    pub fn replace(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        if let Some(active) = self.active {
            if self.index_of(active).is_none() {
                tracing::debug!(task_id = %active, "dragged task vanished, drag cancelled");
                self.active = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanban_proto::user::UserId;

    fn board(texts: &[&str]) -> Board {
        Board::from_tasks(
            texts
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    Task::new(TaskId::new(i as u64 + 1), UserId::new("1"), text, 0).unwrap()
                })
                .collect(),
        )
    }

    fn texts(board: &Board) -> Vec<&str> {
        board.tasks().iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn drag_down_moves_to_target_index() {
        let mut b = board(&["A", "B", "C", "D"]);
        assert!(b.drag_start(TaskId::new(2)));
        assert!(b.drag_end(Some(TaskId::new(4))));
        assert_eq!(texts(&b), vec!["A", "C", "D", "B"]);
        assert_eq!(b.active(), None);
    }

    #[test]
    fn drag_up_moves_to_target_index() {
        let mut b = board(&["A", "B", "C", "D"]);
        b.drag_start(TaskId::new(4));
        assert!(b.drag_end(Some(TaskId::new(1))));
        assert_eq!(texts(&b), vec!["D", "A", "B", "C"]);
    }

    #[test]
    fn drop_on_self_or_nothing_is_unchanged() {
        let mut b = board(&["A", "B", "C"]);
        b.drag_start(TaskId::new(2));
        assert!(!b.drag_end(Some(TaskId::new(2))));
        b.drag_start(TaskId::new(2));
        assert!(!b.drag_end(None));
        assert_eq!(texts(&b), vec!["A", "B", "C"]);
    }

    #[test]
    fn drop_on_unknown_target_is_unchanged() {
        let mut b = board(&["A", "B"]);
        b.drag_start(TaskId::new(1));
        assert!(!b.drag_end(Some(TaskId::new(99))));
        assert_eq!(texts(&b), vec!["A", "B"]);
    }

    #[test]
    fn drag_start_ignores_unknown_id() {
        let mut b = board(&["A"]);
        assert!(!b.drag_start(TaskId::new(5)));
        assert_eq!(b.active(), None);
        assert!(!b.drag_end(Some(TaskId::new(1))));
    }

    #[test]
    fn cancel_drag_clears_without_moving() {
        let mut b = board(&["A", "B"]);
        b.drag_start(TaskId::new(1));
        b.cancel_drag();
        assert!(!b.drag_end(Some(TaskId::new(2))));
        assert_eq!(texts(&b), vec!["A", "B"]);
    }

    #[test]
    fn replace_cancels_drag_of_vanished_task() {
        let mut b = board(&["A", "B"]);
        b.drag_start(TaskId::new(2));
        b.replace(board(&["A"]).tasks().to_vec());
        assert_eq!(b.active(), None);
    }

    #[test]
    fn replace_keeps_drag_of_surviving_task() {
        let mut b = board(&["A", "B"]);
        b.drag_start(TaskId::new(1));
        b.replace(board(&["A", "B", "C"]).tasks().to_vec());
        assert_eq!(b.active(), Some(TaskId::new(1)));
    }

    #[test]
    fn partitions_are_stable_filters() {
        let mut b = board(&["A", "B", "C"]);
        let mut tasks = b.tasks().to_vec();
        tasks[1].completed = true;
        b.replace(tasks);

        let pending: Vec<_> = b.pending().iter().map(|t| t.text.as_str()).collect();
        let completed: Vec<_> = b.completed().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(pending, vec!["A", "C"]);
        assert_eq!(completed, vec!["B"]);
    }
}
