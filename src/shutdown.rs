//! Process shutdown fan-out.
//!
//! One `ShutdownTrigger` is held by `main`; every background task holds a
//! cloned `Shutdown` and selects on `wait()` next to its own work. Built on
//! `tokio::sync::watch` so a task that subscribes after the trigger fired
//! still observes it.

use tokio::sync::watch;
use tracing::warn;

/// Create a linked trigger/listener pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every listener. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown { rx: self.tx.subscribe() }
    }
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolve once shutdown has been triggered (or the trigger dropped).
    pub async fn wait(&mut self) {
        // A dropped trigger means main is gone; treat it as shutdown too.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Wait for Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "shutdown: SIGTERM handler unavailable, waiting for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod tests;
