//! Sentinel relay: encrypted TCP telemetry ingest with a WebSocket fan-out.
//!
//! The binary in `main.rs` wires these modules together; they are a library
//! so integration code and the test suite can drive each piece directly.

pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod hub;
pub mod ingest;
pub mod metrics;
pub mod net;
pub mod relay;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod ticker;
