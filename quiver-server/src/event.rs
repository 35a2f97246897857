//! Single-shot event.
//!
//! Coordinates shutdown (`quit`) and per-connection teardown (`closed`).
//! Firing is idempotent; any number of tasks can wait for the fire.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// A one-shot signal with an observable fired state.
pub struct Event {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Event {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Event {
            fired: AtomicBool::new(false),
            tx,
        }
    }

    /// Fires the event. Returns true only on the first call.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the event has fired. Completes immediately if it
    /// already has.
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
