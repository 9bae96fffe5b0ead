//! Core engine for file-backed Kanban boards.

pub mod activity;
pub mod apply;
pub mod board;
pub mod claim;
pub mod config;
pub mod deps;
pub mod error;
pub mod repair;
pub mod store;
pub mod task;
pub mod transition;
pub mod validate;
pub mod views;

pub use error::{KanbanError, Result};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
