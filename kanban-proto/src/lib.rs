//! Shared entity model and backend wire protocol for the kanban board.

pub mod backend;
pub mod codec;
pub mod task;
pub mod user;
