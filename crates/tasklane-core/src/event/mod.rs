//! Engine notifications.
//!
//! `EventBus` fans `EngineEvent`s out over a `tokio::sync::broadcast` channel;
//! `InstanceEvents` follows a single instance.

pub mod bus;

pub use bus::{EventBus, InstanceEvents};
