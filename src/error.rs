//! Process-level error types.
//!
//! Per-connection and per-frame errors live next to the code that produces
//! them (`ingest::IngestError`, `fetch::FetchError`, `relay::RelayError`).
//! The types here are the ones that can stop the process from starting.

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: invalid number '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key}: must be greater than zero")]
    Zero { key: &'static str },
    #[error("CIPHER_MODE: {0}")]
    CipherMode(#[from] frames::CodecError),
    #[error("INGEST_MODE: unknown mode '{0}' (expected 'ack' or 'fetch')")]
    IngestMode(String),
    #[error("UPSTREAM_URL: '{0}' is not a ws:// or wss:// url")]
    UpstreamUrl(String),
}

/// Fatal startup failure. Returned from `main`.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no free port in {first}..={last}")]
    PortsExhausted { first: u16, last: u16 },
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch client: {0}")]
    Fetch(#[from] crate::fetch::FetchError),
    #[error("server: {0}")]
    Serve(std::io::Error),
}

impl StartupError {
    pub(crate) fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind { addr: addr.into(), source }
    }
}

