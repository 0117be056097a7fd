// Library root — exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod clock;
pub mod endpoint;
pub mod error;
pub mod fees;
pub mod metrics;
pub mod persistence;
pub mod poller;
pub mod scheduler;
pub mod services;
pub mod shutdown;
pub mod store;

// Startup plumbing used by the binary.
pub mod cli;
pub mod config;
pub mod logging;
