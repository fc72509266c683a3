//! Meshwatch Common - node model, state store and derived views
//!
//! Everything the collector daemon needs that is not I/O: the telemetry
//! entities, the node state store with its engines, the liveness state
//! machine, the scheduler, and the graph and snapshot generators.

pub mod config;
pub mod error;
pub mod graph;
pub mod import;
pub mod liveness;
pub mod model;
pub mod output;
pub mod record;
pub mod scheduler;
pub mod snapshot;
pub mod store;

pub use config::CollectorConfig;
pub use error::{EntityKind, StoreError, StoreResult};
pub use record::{Envelope, Record, RecordKind};
pub use store::{open_store, EngineOptions, NodeCallback, NodeStore};
