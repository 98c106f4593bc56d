//! Process model loading and validation.
//!
//! Models are authored as YAML, parsed into `ProcessModel`, and validated once
//! when loaded. The engine assumes every model it receives passed validation.

pub mod definition;
pub mod graph;

#[cfg(test)]
pub(crate) mod fixtures;

pub use definition::{
    ModelError, discover_models, load_model_file, parse_model_yaml, validate_model,
};
