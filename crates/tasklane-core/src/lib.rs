//! Process engine and repository trait definitions for Tasklane.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, and the engine that drives process instances through
//! them. It depends only on `tasklane-types` -- never on `tasklane-infra` or
//! any database/IO crate.

pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod repository;
pub mod service;
