//! Shared domain types for Tasklane.
//!
//! This crate contains the domain types used across every layer of the
//! process engine: process models and their task definitions, process
//! instances, task occurrences, human tasks, the event log, identities,
//! configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, semver, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod human_task;
pub mod identity;
pub mod instance;
pub mod task;
