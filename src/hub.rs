//! Broadcast hub: fan-out of events to WebSocket subscribers.
//!
//! DESIGN
//! ======
//! The hub never touches sockets. Each subscriber is a bounded
//! `mpsc::Sender<Outbound>` owned by its `routes::ws` task, which does the
//! actual writes. `broadcast` serializes an event once and `try_send`s the
//! same `Utf8Bytes` to every subscriber, so a slow or dead subscriber can
//! only lose its own messages and never stalls the others.
//!
//! LIVENESS
//! ========
//! Every sweep: a subscriber whose `alive` flag is still false is sent
//! `Close` and dropped; every other subscriber has the flag cleared and is
//! sent `Ping`. A pong (or any inbound frame) sets the flag again. A
//! subscriber that misses one full cycle is therefore evicted on the next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::Event;
use crate::metrics::Aggregator;
use crate::shutdown::Shutdown;

/// Instruction for a subscriber's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized event JSON.
    Text(Utf8Bytes),
    /// Liveness probe.
    Ping,
    /// Terminate the connection.
    Close,
}

struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    alive: bool,
}

/// Counts from one liveness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

#[derive(Clone)]
pub struct Hub {
    subscribers: Arc<Mutex<HashMap<Uuid, Subscriber>>>,
    aggregator: Aggregator,
}

impl Hub {
    #[must_use]
    pub fn new(aggregator: Aggregator) -> Self {
        Self { subscribers: Arc::new(Mutex::new(HashMap::new())), aggregator }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber, queueing an `init` snapshot ahead of any
    /// broadcast. Returns false if the subscriber's channel is already gone.
    pub fn subscribe(&self, id: Uuid, tx: mpsc::Sender<Outbound>) -> bool {
        let init = match Event::init(&self.aggregator.snapshot()).to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "hub: failed to serialize init");
                return false;
            }
        };

        // Hold the lock across send + insert so no broadcast can slip in
        // ahead of `init`.
        let mut subs = self.lock();
        if tx.try_send(Outbound::Text(Utf8Bytes::from(init))).is_err() {
            return false;
        }
        subs.insert(id, Subscriber { tx, alive: true });
        info!(%id, subscribers = subs.len(), "hub: subscriber added");
        true
    }

    pub fn unsubscribe(&self, id: Uuid) {
        let mut subs = self.lock();
        if subs.remove(&id).is_some() {
            info!(%id, subscribers = subs.len(), "hub: subscriber removed");
        }
    }

    /// Deliver `event` to every subscriber. Returns how many accepted it.
    pub fn broadcast(&self, event: &Event) -> usize {
        let json = match event.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                error!(kind = event.kind().as_str(), error = %e, "hub: failed to serialize event");
                return 0;
            }
        };

        let mut subs = self.lock();
        let mut delivered = 0;
        subs.retain(|id, sub| match sub.tx.try_send(Outbound::Text(json.clone())) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(%id, kind = event.kind().as_str(), "hub: subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%id, "hub: subscriber channel closed");
                false
            }
        });
        delivered
    }

    /// Record a liveness response from `id`.
    pub fn mark_alive(&self, id: Uuid) {
        if let Some(sub) = self.lock().get_mut(&id) {
            sub.alive = true;
        }
    }

    /// Run one liveness cycle.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut subs = self.lock();
        subs.retain(|id, sub| {
            if !sub.alive {
                let _ = sub.tx.try_send(Outbound::Close);
                warn!(%id, "hub: subscriber missed liveness probe, evicting");
                report.evicted += 1;
                return false;
            }
            sub.alive = false;
            match sub.tx.try_send(Outbound::Ping) {
                Err(TrySendError::Closed(_)) => false,
                _ => {
                    report.probed += 1;
                    true
                }
            }
        });
        report
    }

    /// Tell every subscriber to close and forget them all.
    pub fn close_all(&self) {
        let mut subs = self.lock();
        for sub in subs.values() {
            let _ = sub.tx.try_send(Outbound::Close);
        }
        let closed = subs.len();
        subs.clear();
        info!(closed, "hub: all subscribers closed");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Spawn the periodic liveness sweep. The first sweep runs one full
/// `period` after start.
pub fn spawn_liveness_task(hub: Hub, period: Duration, mut shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = hub.sweep();
                    if report.evicted > 0 {
                        info!(probed = report.probed, evicted = report.evicted, "hub: liveness sweep");
                    }
                }
                () = shutdown.wait() => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
