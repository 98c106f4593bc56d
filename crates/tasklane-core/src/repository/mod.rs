//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (tasklane-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod directory;
pub mod instance;
pub mod memory;
pub mod model;

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}
