use super::*;

use serde_json::Value;

use crate::event::EventKind;
use crate::shutdown;

fn hub() -> Hub {
    Hub::new(Aggregator::new())
}

fn join(hub: &Hub, capacity: usize) -> (Uuid, mpsc::Receiver<Outbound>) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(capacity);
    assert!(hub.subscribe(id, tx));
    (id, rx)
}

fn expect_text(out: Outbound) -> Value {
    match out {
        Outbound::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text, got {other:?}"),
    }
}

// =============================================================================
// SUBSCRIBE / BROADCAST
// =============================================================================

#[test]
fn subscribe_sends_init_first() {
    let agg = Aggregator::new();
    agg.record_frame(12);
    let hub = Hub::new(agg);

    let (_, mut rx) = join(&hub, 8);
    hub.broadcast(&Event::client_join("a"));

    let init = expect_text(rx.try_recv().unwrap());
    assert_eq!(init["type"], "init");
    assert_eq!(init["payload"]["totalMessages"], 1);
    assert_eq!(init["payload"]["totalBytesIn"], 12);

    let next = expect_text(rx.try_recv().unwrap());
    assert_eq!(next["type"], "client_join");
}

#[test]
fn subscribe_rejects_closed_channel() {
    let hub = hub();
    let (tx, rx) = mpsc::channel(4);
    drop(rx);
    assert!(!hub.subscribe(Uuid::new_v4(), tx));
    assert!(hub.is_empty());
}

#[test]
fn broadcast_sends_identical_bytes_to_all() {
    let hub = hub();
    let (_, mut a) = join(&hub, 8);
    let (_, mut b) = join(&hub, 8);
    let _ = a.try_recv();
    let _ = b.try_recv();

    let event = Event::log("10.0.0.1:1", "hello");
    assert_eq!(hub.broadcast(&event), 2);

    let from_a = a.try_recv().unwrap();
    let from_b = b.try_recv().unwrap();
    assert_eq!(from_a, from_b);
    assert_eq!(from_a, Outbound::Text(Utf8Bytes::from(event.to_json().unwrap())));
}

#[test]
fn full_subscriber_does_not_block_others() {
    let hub = hub();
    // Capacity 1 is consumed by `init`.
    let (slow_id, mut slow) = join(&hub, 1);
    let (_, mut fast) = join(&hub, 8);
    let _ = fast.try_recv();

    assert_eq!(hub.broadcast(&Event::client_leave("x")), 1);
    assert_eq!(expect_text(fast.try_recv().unwrap())["type"], "client_leave");

    // The slow subscriber is kept, only the event was dropped for it.
    assert_eq!(hub.len(), 2);
    assert_eq!(expect_text(slow.try_recv().unwrap())["type"], "init");
    assert!(slow.try_recv().is_err());
    hub.unsubscribe(slow_id);
    assert_eq!(hub.len(), 1);
}

#[test]
fn closed_subscriber_is_pruned_on_broadcast() {
    let hub = hub();
    let (_, dead) = join(&hub, 8);
    let (_, mut live) = join(&hub, 8);
    drop(dead);

    assert_eq!(hub.broadcast(&Event::new(EventKind::Heartbeat, Value::Null)), 1);
    assert_eq!(hub.len(), 1);
    let _ = live.try_recv();
    assert_eq!(expect_text(live.try_recv().unwrap())["type"], "heartbeat");
}

#[test]
fn unsubscribe_stops_delivery() {
    let hub = hub();
    let (id, mut rx) = join(&hub, 8);
    let _ = rx.try_recv();
    hub.unsubscribe(id);
    hub.unsubscribe(id);

    assert_eq!(hub.broadcast(&Event::log("a", "b")), 0);
    assert!(rx.try_recv().is_err());
}

// =============================================================================
// LIVENESS
// =============================================================================

#[test]
fn sweep_probes_then_evicts_silent_subscriber() {
    let hub = hub();
    let (_, mut rx) = join(&hub, 8);
    let _ = rx.try_recv();

    assert_eq!(hub.sweep(), SweepReport { probed: 1, evicted: 0 });
    assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
    assert_eq!(hub.len(), 1);

    assert_eq!(hub.sweep(), SweepReport { probed: 0, evicted: 1 });
    assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    assert!(hub.is_empty());
}

#[test]
fn pong_keeps_subscriber() {
    let hub = hub();
    let (id, mut rx) = join(&hub, 8);
    let _ = rx.try_recv();

    for _ in 0..5 {
        hub.sweep();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
        hub.mark_alive(id);
    }
    assert_eq!(hub.len(), 1);
}

#[test]
fn close_all_empties_hub() {
    let hub = hub();
    let (_, mut a) = join(&hub, 8);
    let (_, mut b) = join(&hub, 8);
    let _ = a.try_recv();
    let _ = b.try_recv();

    hub.close_all();
    assert!(hub.is_empty());
    assert_eq!(a.try_recv().unwrap(), Outbound::Close);
    assert_eq!(b.try_recv().unwrap(), Outbound::Close);
}

#[tokio::test(start_paused = true)]
async fn liveness_task_evicts_after_one_missed_cycle() {
    let hub = hub();
    let (_, mut rx) = join(&hub, 8);
    let _ = rx.try_recv();

    let (trigger, shutdown) = shutdown::channel();
    let task = spawn_liveness_task(hub.clone(), Duration::from_secs(30), shutdown);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(rx.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
    assert_eq!(hub.len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    assert!(hub.is_empty());

    trigger.trigger();
    task.await.unwrap();
}
