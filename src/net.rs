//! Listener binding with bounded port fallback.

use std::io::ErrorKind;

use tokio::net::TcpListener;
use tracing::warn;

use crate::error::StartupError;

/// Bind `host:port`, moving up one port on `AddrInUse` at most `retries`
/// times. Returns the listener and the port actually bound.
///
/// # Errors
///
/// [`StartupError::PortsExhausted`] once `port..=port+retries` are all taken,
/// or [`StartupError::Bind`] for any other bind failure.
pub async fn bind_with_retry(host: &str, port: u16, retries: u16) -> Result<(TcpListener, u16), StartupError> {
    let last = port.saturating_add(retries);
    for candidate in port..=last {
        let addr = format!("{host}:{candidate}");
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                let bound = listener.local_addr().map_or(candidate, |a| a.port());
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(%addr, "net: port in use, trying next");
            }
            Err(e) => return Err(StartupError::bind(addr, e)),
        }
    }
    Err(StartupError::PortsExhausted { first: port, last })
}

#[cfg(test)]
#[path = "net_test.rs"]
mod tests;
