//! Process execution engine.
//!
//! - `graph`: in-memory task graph with change tracking
//! - `script`: sandboxed expression and script evaluation
//! - `strategy`: which ready task runs next
//! - `executor`: the step loop, flow selection, joins, timers, predictions
//! - `assignment`: potential owners of human tasks
//! - `persistence`: save and hydrate working copies
//! - `reset`: rewind to before a task
//! - `recorder`: append-only event log

pub mod assignment;
pub mod executor;
pub mod graph;
pub mod persistence;
pub mod recorder;
pub mod reset;
pub mod script;
pub mod strategy;
