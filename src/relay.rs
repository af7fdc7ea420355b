//! Upstream relay client: second-tier hub fed by another hub's `/ws`.
//!
//! DESIGN
//! ======
//! Three pieces:
//! - `handle_upstream_text`: pure message handling. Counter-bearing events
//!   (`heartbeat`, `stats`, `init`) are merged into the local aggregator;
//!   traffic events are re-broadcast with their original timestamp.
//! - `Link`: the connection state machine. It owns the single reconnect
//!   timer and turns `LinkSignal`s into `LinkAction`s. It never does I/O.
//! - `RelayClient`: the driver task. It runs one connection pump at a time
//!   and feeds the pump's signals back into the `Link`.
//!
//! RECONNECT
//! =========
//! `DISCONNECTED → RECONNECT_WAIT → CONNECTING → CONNECTED`. Scheduling a
//! timer aborts any pending one and bumps a generation counter; a
//! `ReconnectDue` carrying an old generation is ignored. Two close events in
//! a row therefore produce exactly one reconnect attempt.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::event::{Event, EventKind, now_ms};
use crate::hub::Hub;
use crate::metrics::{Aggregator, CounterUpdate};
use crate::shutdown::Shutdown;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("upstream closed the connection")]
    Closed,
}

// =============================================================================
// MESSAGE HANDLING
// =============================================================================

/// What `handle_upstream_text` did with one upstream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Counters merged into the local aggregator.
    Merged(EventKind),
    /// Re-broadcast to local subscribers.
    Relayed(EventKind),
    /// Well-formed but of a type this hub does not know.
    Ignored,
    /// Not an event object.
    Malformed,
}

/// Handle one upstream text message.
pub fn handle_upstream_text(text: &str, aggregator: &Aggregator, hub: &Hub) -> RelayOutcome {
    let obj = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => obj,
        Ok(_) => {
            warn!("relay: upstream message is not an object");
            return RelayOutcome::Malformed;
        }
        Err(e) => {
            warn!(error = %e, "relay: malformed upstream message");
            return RelayOutcome::Malformed;
        }
    };

    let Some(raw_type) = obj.get("type").and_then(Value::as_str) else {
        warn!("relay: upstream message has no type");
        return RelayOutcome::Malformed;
    };
    let Some(kind) = EventKind::parse(raw_type) else {
        debug!(kind = raw_type, "relay: dropping unknown event type");
        return RelayOutcome::Ignored;
    };

    let ts = obj.get("ts").and_then(Value::as_i64).unwrap_or_else(now_ms);
    let payload = normalize_payload(obj);

    match kind {
        EventKind::Heartbeat | EventKind::Stats | EventKind::Init => {
            let merged = aggregator.merge_counters(CounterUpdate::from_payload(&payload));
            debug!(kind = kind.as_str(), active = merged.active_clients, "relay: counters merged");
            RelayOutcome::Merged(kind)
        }
        EventKind::Throughput
        | EventKind::Log
        | EventKind::ClientJoin
        | EventKind::ClientLeave
        | EventKind::Error => {
            hub.broadcast(&Event::from_parts(kind, payload, ts));
            RelayOutcome::Relayed(kind)
        }
    }
}

/// Use `payload` when present; otherwise treat the remaining top-level
/// fields as the payload (older hubs sent flat events).
fn normalize_payload(mut obj: Map<String, Value>) -> Value {
    if let Some(payload) = obj.remove("payload") {
        return payload;
    }
    obj.remove("type");
    obj.remove("ts");
    Value::Object(obj)
}

// =============================================================================
// LINK STATE MACHINE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectWait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    Connected,
    Closed { reason: String },
    ReconnectDue { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Start a new connection attempt.
    Connect,
    Nothing,
}

/// The one pending reconnect timer, if any.
pub struct ReconnectTimer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl ReconnectTimer {
    fn new() -> Self {
        Self { handle: None, generation: 0 }
    }

    /// Replace any pending timer with one firing after `delay`.
    fn schedule(&mut self, delay: Duration, signals: mpsc::UnboundedSender<LinkSignal>) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(LinkSignal::ReconnectDue { generation });
        }));
        generation
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct Link {
    state: RelayState,
    timer: ReconnectTimer,
    delay: Duration,
    signals: mpsc::UnboundedSender<LinkSignal>,
}

impl Link {
    #[must_use]
    pub fn new(delay: Duration, signals: mpsc::UnboundedSender<LinkSignal>) -> Self {
        Self { state: RelayState::Disconnected, timer: ReconnectTimer::new(), delay, signals }
    }

    #[must_use]
    pub fn state(&self) -> RelayState {
        self.state
    }

    #[must_use]
    pub fn timer(&self) -> &ReconnectTimer {
        &self.timer
    }

    pub fn start(&mut self) -> LinkAction {
        self.state = RelayState::Connecting;
        LinkAction::Connect
    }

    pub fn on_signal(&mut self, signal: LinkSignal) -> LinkAction {
        match signal {
            LinkSignal::Connected => {
                self.timer.cancel();
                self.state = RelayState::Connected;
                LinkAction::Nothing
            }
            LinkSignal::Closed { reason } => {
                self.state = RelayState::Disconnected;
                let generation = self.timer.schedule(self.delay, self.signals.clone());
                self.state = RelayState::ReconnectWait;
                info!(%reason, delay_ms = self.delay.as_millis(), generation, "relay: link down, reconnect scheduled");
                LinkAction::Nothing
            }
            LinkSignal::ReconnectDue { generation } => {
                if generation != self.timer.generation || self.state != RelayState::ReconnectWait {
                    debug!(generation, current = self.timer.generation, "relay: stale reconnect timer");
                    return LinkAction::Nothing;
                }
                self.timer.handle = None;
                self.state = RelayState::Connecting;
                LinkAction::Connect
            }
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

pub struct RelayClient {
    pub url: String,
    pub aggregator: Aggregator,
    pub hub: Hub,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl RelayClient {
    pub fn spawn(self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: Shutdown) {
        let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();
        let mut link = Link::new(self.reconnect_delay, signals_tx.clone());
        let mut action = link.start();
        let mut pump: Option<JoinHandle<()>> = None;

        loop {
            if action == LinkAction::Connect {
                if let Some(old) = pump.take() {
                    old.abort();
                }
                info!(url = %self.url, "relay: connecting");
                pump = Some(tokio::spawn(connect_and_pump(
                    self.url.clone(),
                    self.aggregator.clone(),
                    self.hub.clone(),
                    self.connect_timeout,
                    signals_tx.clone(),
                )));
            }

            tokio::select! {
                signal = signals_rx.recv() => {
                    let Some(signal) = signal else { break };
                    action = link.on_signal(signal);
                }
                () = shutdown.wait() => break,
            }
        }

        if let Some(pump) = pump {
            pump.abort();
        }
        info!("relay: stopped");
    }
}

/// One connection lifetime: connect, pump messages, report the close.
async fn connect_and_pump(
    url: String,
    aggregator: Aggregator,
    hub: Hub,
    connect_timeout: Duration,
    signals: mpsc::UnboundedSender<LinkSignal>,
) {
    let reason = match pump(&url, &aggregator, &hub, connect_timeout, &signals).await {
        Ok(()) => RelayError::Closed.to_string(),
        Err(e) => {
            warn!(%url, error = %e, "relay: link error");
            e.to_string()
        }
    };
    let _ = signals.send(LinkSignal::Closed { reason });
}

async fn pump(
    url: &str,
    aggregator: &Aggregator,
    hub: &Hub,
    connect_timeout: Duration,
    signals: &mpsc::UnboundedSender<LinkSignal>,
) -> Result<(), RelayError> {
    let (mut stream, _) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| RelayError::Timeout(connect_timeout))?
        .map_err(RelayError::Connect)?;
    info!(%url, "relay: connected");
    let _ = signals.send(LinkSignal::Connected);

    while let Some(msg) = stream.next().await {
        match msg.map_err(RelayError::Transport)? {
            Message::Text(text) => {
                handle_upstream_text(text.as_str(), aggregator, hub);
            }
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    handle_upstream_text(text, aggregator, hub);
                }
                Err(_) => warn!("relay: dropping non-utf8 binary message"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
