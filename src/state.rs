//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into every ingest connection task. It owns nothing mutable
//! directly: counters live behind the `Aggregator`, subscribers behind the
//! `Hub`, and the codec/config are immutable after startup.

use std::sync::Arc;

use frames::FrameCodec;

use crate::config::{Config, IngestMode};
use crate::fetch::{FetchError, Fetcher};
use crate::hub::Hub;
use crate::metrics::Aggregator;

/// Shared application state. Clone is required by Axum; every field is
/// Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub hub: Hub,
    pub codec: Arc<FrameCodec>,
    pub config: Arc<Config>,
    /// Present only in fetch ingest mode.
    pub fetcher: Option<Arc<Fetcher>>,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if fetch mode is on and the HTTP client cannot
    /// be constructed.
    pub fn new(config: Config) -> Result<Self, FetchError> {
        let aggregator = Aggregator::new();
        let hub = Hub::new(aggregator.clone());
        let codec = Arc::new(FrameCodec::from_mode(config.cipher_mode, &config.keys));
        let fetcher = match config.ingest_mode {
            IngestMode::Fetch => Some(Arc::new(Fetcher::new(config.fetch_timeout)?)),
            IngestMode::Ack => None,
        };
        Ok(Self { aggregator, hub, codec, config: Arc::new(config), fetcher })
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
