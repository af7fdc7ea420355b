use super::*;

use time::macros::datetime;

#[test]
fn kind_round_trips_through_wire_name() {
    for kind in [
        EventKind::Init,
        EventKind::Heartbeat,
        EventKind::Stats,
        EventKind::Log,
        EventKind::ClientJoin,
        EventKind::ClientLeave,
        EventKind::Throughput,
        EventKind::Error,
    ] {
        assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
    }
}

#[test]
fn unknown_kind_is_none() {
    assert_eq!(EventKind::parse("presence"), None);
    assert_eq!(EventKind::parse(""), None);
    assert_eq!(EventKind::parse("LOG"), None);
}

#[test]
fn wire_form_uses_type_payload_ts() {
    let event = Event::from_parts(EventKind::Log, json!({"remote": "a", "message": "b"}), 42);
    let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
    assert_eq!(value["type"], "log");
    assert_eq!(value["payload"]["message"], "b");
    assert_eq!(value["ts"], 42);
    assert_eq!(value.as_object().unwrap().len(), 3);
}

#[test]
fn new_stamps_current_time() {
    let before = now_ms();
    let event = Event::client_join("127.0.0.1:5000");
    let after = now_ms();
    assert!(event.ts() >= before && event.ts() <= after);
    assert_eq!(event.kind(), EventKind::ClientJoin);
    assert_eq!(event.payload()["remote"], "127.0.0.1:5000");
}

#[test]
fn heartbeat_carries_counters() {
    let counters = Counters {
        active_clients: 2,
        total_messages: 10,
        total_bytes_in: 300,
        total_bytes_out: 120,
    };
    let event = Event::heartbeat(&counters);
    let p = event.payload();
    assert_eq!(p["activeTCPClients"], 2);
    assert_eq!(p["totalMessages"], 10);
    assert_eq!(p["totalBytesIn"], 300);
    assert_eq!(p["totalBytesOut"], 120);
}

#[test]
fn stats_includes_last_message_at() {
    let counters = Counters::default();
    let at = datetime!(2025-01-02 03:04:05 UTC);

    let with = Event::stats(&counters, Some(at));
    assert_eq!(with.kind(), EventKind::Stats);
    assert_eq!(with.payload()["lastMessageAt"], "2025-01-02T03:04:05Z");

    let without = Event::stats(&counters, None);
    assert!(without.payload()["lastMessageAt"].is_null());
    assert_eq!(without.payload()["activeTCPClients"], 0);
}

#[test]
fn throughput_payload_is_window() {
    let window = ThroughputWindow { second: 1_700_000_000, count: 3, bytes: 75 };
    let event = Event::throughput(&window);
    assert_eq!(event.payload(), &json!({"second": 1_700_000_000u64, "count": 3, "bytes": 75}));
}

#[test]
fn error_omits_details_when_absent() {
    let event = Event::error("10.0.0.1:9", REASON_DECRYPT_FAILED, None);
    assert_eq!(event.payload(), &json!({"remote": "10.0.0.1:9", "reason": "decrypt_failed"}));

    let event = Event::error("10.0.0.1:9", REASON_TCP_ERROR, Some("connection reset"));
    assert_eq!(event.payload()["reason"], "tcp_error");
    assert_eq!(event.payload()["details"], "connection reset");
}

#[test]
fn init_serializes_snapshot() {
    let snapshot = crate::metrics::Aggregator::starting_at(datetime!(2025-01-01 00:00:00 UTC)).snapshot();
    let event = Event::init(&snapshot);
    let p = event.payload();
    assert_eq!(p["startedAt"], "2025-01-01T00:00:00Z");
    assert_eq!(p["activeTCPClients"], 0);
    assert!(p["lastMessageAt"].is_null());
    assert_eq!(p["perSecondWindow"]["count"], 0);
    assert!(p["uptimeSeconds"].is_u64());
}

#[test]
fn deserializes_from_wire() {
    let raw = r#"{"type":"client_leave","payload":{"remote":"x"},"ts":7}"#;
    let event: Event = serde_json::from_str(raw).unwrap();
    assert_eq!(event, Event::from_parts(EventKind::ClientLeave, json!({"remote": "x"}), 7));
}
