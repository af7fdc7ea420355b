//! Event: the message type pushed to dashboard subscribers.
//!
//! DESIGN
//! ======
//! Every server→subscriber message is `{type, payload, ts}` JSON. `type` is
//! a closed enum so every consumer (`hub`, `relay`) matches exhaustively;
//! `payload` stays flexible JSON like the rest of the dashboard protocol.
//! Events are immutable once built: fields are private and only the typed
//! constructors below create them.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::metrics::{Counters, MetricsSnapshot, ThroughputWindow};

/// Error payload reason for a frame that failed base64/cipher decoding.
pub const REASON_DECRYPT_FAILED: &str = "decrypt_failed";

/// Error payload reason for a TCP read/write failure.
pub const REASON_TCP_ERROR: &str = "tcp_error";

/// Error payload reason for a partial frame that outgrew the line limit.
pub const REASON_FRAME_TOO_LARGE: &str = "frame_too_large";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Init,
    Heartbeat,
    Stats,
    Log,
    ClientJoin,
    ClientLeave,
    Throughput,
    Error,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Heartbeat => "heartbeat",
            Self::Stats => "stats",
            Self::Log => "log",
            Self::ClientJoin => "client_join",
            Self::ClientLeave => "client_leave",
            Self::Throughput => "throughput",
            Self::Error => "error",
        }
    }

    /// Parse a wire `type` string. Unknown types yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "init" => Some(Self::Init),
            "heartbeat" => Some(Self::Heartbeat),
            "stats" => Some(Self::Stats),
            "log" => Some(Self::Log),
            "client_join" => Some(Self::ClientJoin),
            "client_leave" => Some(Self::ClientLeave),
            "throughput" => Some(Self::Throughput),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One broadcastable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: EventKind,
    payload: Value,
    /// Milliseconds since Unix epoch.
    ts: i64,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Event {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload, ts: now_ms() }
    }

    /// Rebuild an event received from elsewhere, keeping its original timestamp.
    #[must_use]
    pub fn from_parts(kind: EventKind, payload: Value, ts: i64) -> Self {
        Self { kind, payload, ts }
    }

    #[must_use]
    pub fn init(snapshot: &MetricsSnapshot) -> Self {
        Self::new(EventKind::Init, serde_json::to_value(snapshot).unwrap_or_default())
    }

    #[must_use]
    pub fn heartbeat(counters: &Counters) -> Self {
        Self::new(EventKind::Heartbeat, serde_json::to_value(counters).unwrap_or_default())
    }

    /// Counter update sent after each processed frame and each disconnect.
    #[must_use]
    pub fn stats(counters: &Counters, last_message_at: Option<OffsetDateTime>) -> Self {
        let last = last_message_at.and_then(|at| at.format(&Rfc3339).ok());
        let mut payload = serde_json::to_value(counters).unwrap_or_default();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("lastMessageAt".into(), json!(last));
        }
        Self::new(EventKind::Stats, payload)
    }

    #[must_use]
    pub fn log(remote: &str, message: &str) -> Self {
        Self::new(EventKind::Log, json!({ "remote": remote, "message": message }))
    }

    #[must_use]
    pub fn client_join(remote: &str) -> Self {
        Self::new(EventKind::ClientJoin, json!({ "remote": remote }))
    }

    #[must_use]
    pub fn client_leave(remote: &str) -> Self {
        Self::new(EventKind::ClientLeave, json!({ "remote": remote }))
    }

    #[must_use]
    pub fn throughput(window: &ThroughputWindow) -> Self {
        Self::new(EventKind::Throughput, serde_json::to_value(window).unwrap_or_default())
    }

    /// Diagnostic error event. `details` is omitted when `None`.
    #[must_use]
    pub fn error(remote: &str, reason: &str, details: Option<&str>) -> Self {
        let mut payload = json!({ "remote": remote, "reason": reason });
        if let (Some(details), Some(obj)) = (details, payload.as_object_mut()) {
            obj.insert("details".into(), json!(details));
        }
        Self::new(EventKind::Error, payload)
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Serialize to the `{type, payload, ts}` wire form.
    ///
    /// # Errors
    ///
    /// Returns an error only if the payload holds non-JSON-representable data.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
