//! Metrics aggregator: owned traffic and connection counters.
//!
//! DESIGN
//! ======
//! One `Aggregator` per process, cloned (Arc) into every handler. All
//! mutation goes through short synchronous methods that take the lock, update
//! and release it; no lock is ever held across an `.await`. Readers get
//! `MetricsSnapshot` copies, never references into the live counters.
//!
//! THROUGHPUT WINDOW
//! =================
//! The window accumulates the messages/bytes of one wall-clock second. The
//! throughput ticker calls `roll_window_at(now)`: when `now` has passed the
//! window's second, the closed window is returned (even if empty) and a new
//! zeroed window starts at `now`. Skipped seconds are back-filled with zero
//! windows so every second is reported exactly once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;

/// Upper bound on zero windows emitted for one stalled tick.
pub const MAX_BACKFILL_SECONDS: u64 = 60;

// =============================================================================
// TYPES
// =============================================================================

/// One second of traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputWindow {
    /// Unix second this window covers.
    pub second: u64,
    /// Frames received during the second.
    pub count: u64,
    /// Wire bytes received during the second.
    pub bytes: u64,
}

impl ThroughputWindow {
    fn empty(second: u64) -> Self {
        Self { second, count: 0, bytes: 0 }
    }
}

/// Cumulative counters carried by `heartbeat` and `stats` events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    #[serde(rename = "activeTCPClients")]
    pub active_clients: u64,
    pub total_messages: u64,
    pub total_bytes_in: u64,
    pub total_bytes_out: u64,
}

/// Partial counter set received from an upstream hub. `None` fields keep
/// the local value when merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterUpdate {
    pub active_clients: Option<u64>,
    pub total_messages: Option<u64>,
    pub total_bytes_in: Option<u64>,
    pub total_bytes_out: Option<u64>,
}

impl CounterUpdate {
    /// Read counters from an event payload. Missing, negative or non-numeric
    /// fields are treated as absent.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let field = |key: &str| payload.get(key).and_then(Value::as_u64);
        Self {
            active_clients: field("activeTCPClients"),
            total_messages: field("totalMessages"),
            total_bytes_in: field("totalBytesIn"),
            total_bytes_out: field("totalBytesOut"),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Read-only copy of the aggregator state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(flatten)]
    pub counters: Counters,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub per_second_window: ThroughputWindow,
    pub uptime_seconds: u64,
}

/// Current wall-clock Unix second.
#[must_use]
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

// =============================================================================
// AGGREGATOR
// =============================================================================

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Mutex<Metrics>>,
}

struct Metrics {
    started_at: OffsetDateTime,
    counters: Counters,
    last_message_at: Option<OffsetDateTime>,
    window: ThroughputWindow,
}

impl Metrics {
    fn add_message(&mut self) {
        self.counters.total_messages = self.counters.total_messages.saturating_add(1);
        self.window.count = self.window.count.saturating_add(1);
    }

    fn add_ingress(&mut self, bytes: u64) {
        self.counters.total_bytes_in = self.counters.total_bytes_in.saturating_add(bytes);
        self.window.bytes = self.window.bytes.saturating_add(bytes);
        self.last_message_at = Some(OffsetDateTime::now_utc());
    }
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(OffsetDateTime::now_utc())
    }

    /// Build an aggregator whose clock and first window start at `started_at`.
    #[must_use]
    pub fn starting_at(started_at: OffsetDateTime) -> Self {
        let second = u64::try_from(started_at.unix_timestamp()).unwrap_or(0);
        Self {
            inner: Arc::new(Mutex::new(Metrics {
                started_at,
                counters: Counters::default(),
                last_message_at: None,
                window: ThroughputWindow::empty(second),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(OffsetDateTime::now_utc())
    }

    fn snapshot_at(&self, now: OffsetDateTime) -> MetricsSnapshot {
        let m = self.lock();
        let uptime = (now - m.started_at).whole_seconds();
        MetricsSnapshot {
            started_at: m.started_at,
            counters: m.counters,
            last_message_at: m.last_message_at,
            per_second_window: m.window,
            uptime_seconds: u64::try_from(uptime).unwrap_or(0),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    #[must_use]
    pub fn last_message_at(&self) -> Option<OffsetDateTime> {
        self.lock().last_message_at
    }

    /// Count `bytes` of inbound wire traffic and stamp `lastMessageAt`.
    pub fn record_ingress(&self, bytes: u64) {
        self.lock().add_ingress(bytes);
    }

    /// Count one received frame.
    pub fn record_message(&self) {
        self.lock().add_message();
    }

    /// Count one received frame of `wire_bytes` bytes.
    ///
    /// Message and bytes land in the same window: a concurrent
    /// `roll_window` sees either both or neither.
    pub fn record_frame(&self, wire_bytes: u64) {
        let mut m = self.lock();
        m.add_message();
        m.add_ingress(wire_bytes);
    }

    /// Count `bytes` written back to clients.
    pub fn record_egress(&self, bytes: u64) {
        let mut m = self.lock();
        m.counters.total_bytes_out = m.counters.total_bytes_out.saturating_add(bytes);
    }

    /// Apply a signed delta to the active client count, floored at zero.
    /// Returns the new count.
    pub fn adjust_active_clients(&self, delta: i64) -> u64 {
        let mut m = self.lock();
        let current = m.counters.active_clients;
        m.counters.active_clients = if delta >= 0 {
            current.saturating_add(delta.unsigned_abs())
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        m.counters.active_clients
    }

    pub fn client_connected(&self) -> u64 {
        self.adjust_active_clients(1)
    }

    pub fn client_disconnected(&self) -> u64 {
        self.adjust_active_clients(-1)
    }

    /// Overwrite each counter present in `update`; absent fields are kept.
    pub fn merge_counters(&self, update: CounterUpdate) -> Counters {
        let mut m = self.lock();
        let c = &mut m.counters;
        c.active_clients = update.active_clients.unwrap_or(c.active_clients);
        c.total_messages = update.total_messages.unwrap_or(c.total_messages);
        c.total_bytes_in = update.total_bytes_in.unwrap_or(c.total_bytes_in);
        c.total_bytes_out = update.total_bytes_out.unwrap_or(c.total_bytes_out);
        *c
    }

    /// Close every window older than `now_second`, oldest first.
    ///
    /// Returns an empty vec while `now_second` is still the current window.
    pub fn roll_window_at(&self, now_second: u64) -> Vec<ThroughputWindow> {
        let mut m = self.lock();
        let current = m.window;
        if now_second <= current.second {
            return Vec::new();
        }

        let gap = now_second - current.second - 1;
        let backfill = gap.min(MAX_BACKFILL_SECONDS);
        if gap > MAX_BACKFILL_SECONDS {
            warn!(
                from = current.second,
                to = now_second,
                dropped = gap - MAX_BACKFILL_SECONDS,
                "metrics: clock jumped, not back-filling every empty second"
            );
        }

        let mut closed = Vec::with_capacity(usize::try_from(backfill).unwrap_or(0) + 1);
        closed.push(current);
        let first_empty = now_second - backfill;
        closed.extend((first_empty..now_second).map(ThroughputWindow::empty));

        m.window = ThroughputWindow::empty(now_second);
        closed
    }

    pub fn roll_window(&self) -> Vec<ThroughputWindow> {
        self.roll_window_at(unix_secs())
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
