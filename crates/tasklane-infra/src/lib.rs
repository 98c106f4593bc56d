//! Infrastructure layer for Tasklane.
//!
//! Contains implementations of the ports defined in `tasklane-core`: SQLite
//! storage for instances and the user directory, the filesystem model store,
//! and configuration loading.

pub mod config;
pub mod models;
pub mod sqlite;
