//! Meshwatch daemon library - exposes modules for testing.

pub mod metrics;
pub mod pipeline;
pub mod poller;
pub mod readers;
pub mod routes;
pub mod server;
pub mod transport;
