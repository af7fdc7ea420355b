use super::*;

use serde_json::json;
use time::Duration;
use time::macros::datetime;

const BASE: OffsetDateTime = datetime!(2025-06-01 12:00:00 UTC);

fn base_second() -> u64 {
    u64::try_from(BASE.unix_timestamp()).unwrap()
}

// =============================================================================
// COUNTERS
// =============================================================================

#[test]
fn record_frame_updates_totals_and_window() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_frame(25);
    agg.record_frame(10);

    let snap = agg.snapshot();
    assert_eq!(snap.counters.total_messages, 2);
    assert_eq!(snap.counters.total_bytes_in, 35);
    assert_eq!(snap.per_second_window.count, 2);
    assert_eq!(snap.per_second_window.bytes, 35);
    assert!(snap.last_message_at.is_some());
}

#[test]
fn split_recorders_match_record_frame() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_message();
    agg.record_ingress(25);
    let c = agg.counters();
    assert_eq!((c.total_messages, c.total_bytes_in), (1, 25));
    assert!(agg.last_message_at().is_some());
}

#[test]
fn egress_only_touches_bytes_out() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_egress(64);
    let c = agg.counters();
    assert_eq!(c.total_bytes_out, 64);
    assert_eq!(c.total_messages, 0);
    assert_eq!(agg.snapshot().per_second_window.bytes, 0);
    assert!(agg.last_message_at().is_none());
}

#[test]
fn active_clients_never_negative() {
    let agg = Aggregator::starting_at(BASE);
    assert_eq!(agg.client_disconnected(), 0);
    assert_eq!(agg.client_connected(), 1);
    assert_eq!(agg.client_connected(), 2);
    assert_eq!(agg.adjust_active_clients(-5), 0);
    assert_eq!(agg.adjust_active_clients(3), 3);
}

#[test]
fn clones_share_state() {
    let agg = Aggregator::starting_at(BASE);
    let other = agg.clone();
    other.record_frame(5);
    assert_eq!(agg.counters().total_messages, 1);
}

// =============================================================================
// MERGE
// =============================================================================

#[test]
fn merge_keeps_absent_fields() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_frame(100);
    agg.record_egress(40);

    let merged = agg.merge_counters(CounterUpdate {
        active_clients: Some(7),
        total_messages: Some(900),
        ..CounterUpdate::default()
    });

    assert_eq!(merged.active_clients, 7);
    assert_eq!(merged.total_messages, 900);
    assert_eq!(merged.total_bytes_in, 100);
    assert_eq!(merged.total_bytes_out, 40);
    assert_eq!(agg.counters(), merged);
}

#[test]
fn update_from_payload_ignores_bad_fields() {
    let update = CounterUpdate::from_payload(&json!({
        "activeTCPClients": 3,
        "totalMessages": "12",
        "totalBytesIn": -4,
        "totalBytesOut": 55,
    }));
    assert_eq!(update.active_clients, Some(3));
    assert_eq!(update.total_messages, None);
    assert_eq!(update.total_bytes_in, None);
    assert_eq!(update.total_bytes_out, Some(55));
    assert!(!update.is_empty());

    assert!(CounterUpdate::from_payload(&json!({"other": 1})).is_empty());
    assert!(CounterUpdate::from_payload(&json!(null)).is_empty());
}

// =============================================================================
// WINDOW
// =============================================================================

#[test]
fn roll_within_same_second_is_noop() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_frame(8);
    assert!(agg.roll_window_at(base_second()).is_empty());
    assert!(agg.roll_window_at(base_second() - 1).is_empty());
    assert_eq!(agg.snapshot().per_second_window.count, 1);
}

#[test]
fn roll_emits_closed_window_and_resets() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_frame(8);
    agg.record_frame(12);

    let closed = agg.roll_window_at(base_second() + 1);
    assert_eq!(
        closed,
        vec![ThroughputWindow { second: base_second(), count: 2, bytes: 20 }]
    );

    let window = agg.snapshot().per_second_window;
    assert_eq!(window, ThroughputWindow { second: base_second() + 1, count: 0, bytes: 0 });
}

#[test]
fn empty_window_still_reported() {
    let agg = Aggregator::starting_at(BASE);
    let closed = agg.roll_window_at(base_second() + 1);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].count, 0);
}

#[test]
fn skipped_seconds_are_backfilled() {
    let agg = Aggregator::starting_at(BASE);
    agg.record_frame(3);

    let closed = agg.roll_window_at(base_second() + 4);
    let seconds: Vec<u64> = closed.iter().map(|w| w.second).collect();
    assert_eq!(
        seconds,
        vec![base_second(), base_second() + 1, base_second() + 2, base_second() + 3]
    );
    assert_eq!(closed[0].count, 1);
    assert!(closed[1..].iter().all(|w| w.count == 0 && w.bytes == 0));
}

#[test]
fn backfill_is_capped() {
    let agg = Aggregator::starting_at(BASE);
    let now = base_second() + 1000;
    let closed = agg.roll_window_at(now);

    assert_eq!(closed.len(), 1 + usize::try_from(MAX_BACKFILL_SECONDS).unwrap());
    assert_eq!(closed[0].second, base_second());
    assert_eq!(closed[1].second, now - MAX_BACKFILL_SECONDS);
    assert_eq!(closed.last().unwrap().second, now - 1);
    assert_eq!(agg.snapshot().per_second_window.second, now);
}

#[test]
fn concurrent_roll_never_splits_a_frame() {
    const FRAMES: u64 = 50_000;
    let agg = Aggregator::starting_at(BASE);
    let done = std::sync::atomic::AtomicBool::new(false);

    let mut closed = Vec::new();
    std::thread::scope(|scope| {
        let writer = agg.clone();
        let done = &done;
        scope.spawn(move || {
            for _ in 0..FRAMES {
                writer.record_frame(1);
            }
            done.store(true, std::sync::atomic::Ordering::Release);
        });

        let mut second = base_second();
        while !done.load(std::sync::atomic::Ordering::Acquire) {
            second += 1;
            closed.extend(agg.roll_window_at(second));
        }
        closed.extend(agg.roll_window_at(second + 1));
    });

    for window in &closed {
        assert_eq!(window.count, window.bytes, "frame split across windows at second {}", window.second);
    }
    assert_eq!(closed.iter().map(|w| w.count).sum::<u64>(), FRAMES);
}

// =============================================================================
// SNAPSHOT
// =============================================================================

#[test]
fn snapshot_reports_uptime() {
    let agg = Aggregator::starting_at(BASE);
    let snap = agg.snapshot_at(BASE + Duration::seconds(95));
    assert_eq!(snap.uptime_seconds, 95);
    assert_eq!(snap.started_at, BASE);
}

#[test]
fn snapshot_serializes_flat_camel_case() {
    let agg = Aggregator::starting_at(BASE);
    agg.client_connected();
    let value = serde_json::to_value(agg.snapshot_at(BASE)).unwrap();

    assert_eq!(value["startedAt"], "2025-06-01T12:00:00Z");
    assert_eq!(value["activeTCPClients"], 1);
    assert_eq!(value["totalMessages"], 0);
    assert_eq!(value["totalBytesIn"], 0);
    assert_eq!(value["totalBytesOut"], 0);
    assert!(value["lastMessageAt"].is_null());
    assert_eq!(value["perSecondWindow"]["second"], base_second());
    assert_eq!(value["uptimeSeconds"], 0);
}
