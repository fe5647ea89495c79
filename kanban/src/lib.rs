//! Kanban task board library.
//!
//! Local-first task and comment storage with an optional realtime-synced
//! remote backend, the sync engine that keeps a board consistent with
//! storage, and the session layer that picks whose board is shown.

pub mod backend;
pub mod board;
pub mod config;
pub mod persistence;
pub mod session;
pub mod storage;
pub mod sync;
pub mod view;
