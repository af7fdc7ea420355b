use super::*;

use serde_json::Value;
use time::macros::datetime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::hub::Outbound;
use crate::shutdown;

const BASE: u64 = 1_750_000_000;

fn setup() -> (Aggregator, Hub, mpsc::Receiver<Outbound>) {
    // 2025-06-15T15:06:40Z == BASE
    let aggregator = Aggregator::starting_at(datetime!(2025-06-15 15:06:40 UTC));
    let hub = Hub::new(aggregator.clone());
    let (tx, mut rx) = mpsc::channel(64);
    assert!(hub.subscribe(Uuid::new_v4(), tx));
    let _init = rx.try_recv();
    (aggregator, hub, rx)
}

fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(Outbound::Text(text)) = rx.try_recv() {
        out.push(serde_json::from_str(text.as_str()).unwrap());
    }
    out
}

#[tokio::test(start_paused = true)]
async fn throughput_emits_each_second_including_empty() {
    let (aggregator, hub, mut rx) = setup();
    assert_eq!(aggregator.snapshot().per_second_window.second, BASE);

    let start = Instant::now();
    let clock = move || BASE + start.elapsed().as_secs();
    let (trigger, shutdown) = shutdown::channel();
    let task = spawn_throughput_ticker_with_clock(aggregator.clone(), hub, shutdown, clock);

    aggregator.record_frame(10);
    aggregator.record_frame(15);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let first = drain(&mut rx);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["type"], "throughput");
    assert_eq!(first[0]["payload"]["second"], BASE);
    assert_eq!(first[0]["payload"]["count"], 2);
    assert_eq!(first[0]["payload"]["bytes"], 25);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = drain(&mut rx);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0]["payload"]["second"], BASE + 1);
    assert_eq!(second[0]["payload"]["count"], 0);
    assert_eq!(second[0]["payload"]["bytes"], 0);

    trigger.trigger();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_carries_cumulative_counters() {
    let (aggregator, hub, mut rx) = setup();
    let (trigger, shutdown) = shutdown::channel();
    let task = spawn_heartbeat_ticker(aggregator.clone(), hub, shutdown);

    aggregator.client_connected();
    aggregator.record_frame(30);
    aggregator.record_egress(20);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let beats = drain(&mut rx);
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0]["type"], "heartbeat");
    assert_eq!(beats[0]["payload"]["activeTCPClients"], 1);
    assert_eq!(beats[0]["payload"]["totalMessages"], 1);
    assert_eq!(beats[0]["payload"]["totalBytesIn"], 30);
    assert_eq!(beats[0]["payload"]["totalBytesOut"], 20);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(drain(&mut rx).len(), 3);

    trigger.trigger();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn tickers_stop_on_shutdown() {
    let (aggregator, hub, mut rx) = setup();
    let (trigger, shutdown) = shutdown::channel();
    let heartbeat = spawn_heartbeat_ticker(aggregator.clone(), hub.clone(), shutdown.clone());
    let throughput = spawn_throughput_ticker(aggregator, hub, shutdown);

    trigger.trigger();
    heartbeat.await.unwrap();
    throughput.await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).iter().all(|e| e["type"] != "heartbeat"));
}
