//! Periodic throughput and heartbeat broadcasts.
//!
//! Two independent one-second tickers. The throughput ticker rolls the
//! aggregator's window and broadcasts one `throughput` event per closed
//! second; the heartbeat ticker broadcasts cumulative counters. Keeping them
//! separate means a window reset never shifts the heartbeat cadence.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::event::Event;
use crate::hub::Hub;
use crate::metrics::{Aggregator, unix_secs};
use crate::shutdown::Shutdown;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

pub fn spawn_throughput_ticker(aggregator: Aggregator, hub: Hub, shutdown: Shutdown) -> JoinHandle<()> {
    spawn_throughput_ticker_with_clock(aggregator, hub, shutdown, unix_secs)
}

/// Throughput ticker reading the current Unix second from `clock`.
pub fn spawn_throughput_ticker_with_clock<F>(
    aggregator: Aggregator,
    hub: Hub,
    mut shutdown: Shutdown,
    clock: F,
) -> JoinHandle<()>
where
    F: Fn() -> u64 + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for window in aggregator.roll_window_at(clock()) {
                        hub.broadcast(&Event::throughput(&window));
                    }
                }
                () = shutdown.wait() => break,
            }
        }
    })
}

pub fn spawn_heartbeat_ticker(aggregator: Aggregator, hub: Hub, mut shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the immediate first tick; subscribers already got `init`.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    hub.broadcast(&Event::heartbeat(&aggregator.counters()));
                }
                () = shutdown.wait() => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "ticker_test.rs"]
mod tests;
