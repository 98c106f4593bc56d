//! Business logic services (use cases).
//!
//! Services orchestrate the engine, the stores and the directory. They
//! depend on traits (ports) -- never on concrete infrastructure
//! implementations.

pub mod instance;

pub use instance::{ProcessInstanceService, RunReport};
