//! Kanban reference backend library.
//!
//! An in-memory relational store with three tables (`users`, `tasks`,
//! `comments`) and a row-level change feed, served over WebSocket.
//! Exposed as a library so tests can run the server in-process.

pub mod config;
pub mod server;
pub mod tables;
