//! The service loop: resolve → persist → deliver → sleep, until stopped.
//!
//! Exactly one cycle runs at a time. The next one is scheduled only after
//! the current one has fully finished, so a slow cycle delays the schedule
//! rather than overlapping with the next. The fixed interval is the only
//! retry mechanism for both resolution and delivery.

use crate::delivery::BoxedDelivery;
use crate::location::{Location, LocationResolver};
use crate::store::{LocalStore, PendingPayload, PersistedRecord};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cycle aborted by internal fault: {0}")]
    CycleFault(String),
}

/// What a single cycle achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every provider failed; nothing was persisted or sent.
    NoLocation,
    /// The whole pending queue, including this cycle's reading, was acknowledged.
    Delivered { sent: usize },
    /// Some entries are still waiting for the node.
    Deferred { sent: usize, pending: usize },
}

/// Everything one cycle needs. Shared with the blocking pool between cycles.
pub struct Cycle {
    device_id: String,
    resolver: LocationResolver,
    store: LocalStore,
    delivery: BoxedDelivery,
}

impl Cycle {
    pub fn new(
        device_id: impl Into<String>,
        resolver: LocationResolver,
        store: LocalStore,
        delivery: BoxedDelivery,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            resolver,
            store,
            delivery,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Run one full cycle. Blocks on network and file I/O.
    pub fn run(&self) -> CycleOutcome {
        let Some(location) = self.resolver.resolve() else {
            return CycleOutcome::NoLocation;
        };
        log_location(&location);

        let now = Utc::now();
        let mut record = PersistedRecord {
            device_id: self.device_id.clone(),
            location: location.clone(),
            timestamp: now,
            uploaded: false,
        };
        match self.store.save_last(&record) {
            Ok(()) => tracing::info!("location saved locally"),
            Err(e) => tracing::error!(error = %e, "failed to save location"),
        }

        // An unreadable queue file is left untouched for this cycle; only
        // the new reading is offered for delivery.
        let (mut queue, writable) = match self.store.load_pending_queue() {
            Ok(queue) => (queue, true),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to load pending queue, leaving it untouched this cycle"
                );
                (Vec::new(), false)
            }
        };
        queue.push(PendingPayload::new(&self.device_id, &location, now));
        if writable {
            self.save_queue(&queue);
        }

        let report = self.delivery.deliver(&queue);
        let sent = report.acknowledged.min(queue.len());
        queue.drain(..sent);
        if sent > 0 && writable {
            self.save_queue(&queue);
        }

        if let Some(e) = report.error {
            tracing::warn!(
                strategy = self.delivery.name(),
                error = %e,
                sent,
                pending = queue.len(),
                "upload failed, will retry next cycle"
            );
            return CycleOutcome::Deferred { sent, pending: queue.len() };
        }

        if !queue.is_empty() {
            return CycleOutcome::Deferred { sent, pending: queue.len() };
        }

        tracing::info!(strategy = self.delivery.name(), sent, "location uploaded to node");
        record.uploaded = true;
        if let Err(e) = self.store.save_last(&record) {
            tracing::error!(error = %e, "failed to mark location as uploaded");
        }
        CycleOutcome::Delivered { sent }
    }

    fn save_queue(&self, queue: &[PendingPayload]) {
        if let Err(e) = self.store.save_pending_queue(queue) {
            tracing::error!(error = %e, pending = queue.len(), "failed to save pending queue");
        }
    }
}

fn log_location(loc: &Location) {
    tracing::info!(
        source = loc.source.as_str(),
        accuracy_m = loc.accuracy,
        "location: {}",
        loc.display_line()
    );
    if let Some(place) = loc.place() {
        tracing::info!("city: {}", place);
    }
}

/// Drives cycles on a fixed interval until shutdown.
pub struct ServiceLoop {
    cycle: Arc<Cycle>,
    interval: Duration,
}

impl ServiceLoop {
    pub fn new(cycle: Cycle, interval: Duration) -> Self {
        Self {
            cycle: Arc::new(cycle),
            interval,
        }
    }

    /// Run a single cycle on the blocking pool.
    pub async fn run_once(&self) -> Result<CycleOutcome, ServiceError> {
        let cycle = Arc::clone(&self.cycle);
        tokio::task::spawn_blocking(move || cycle.run())
            .await
            .map_err(|e| ServiceError::CycleFault(e.to_string()))
    }

    /// Run cycles until `shutdown` becomes true.
    ///
    /// A shutdown request never interrupts a cycle in progress; it only
    /// stops the next one from being scheduled. Returns the number of
    /// completed cycles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<u64, ServiceError> {
        let mut completed = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(outcome) => {
                    completed += 1;
                    tracing::debug!(?outcome, cycle = completed, "cycle finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "service loop error, stopping");
                    return Err(e);
                }
            }

            if *shutdown.borrow() {
                break;
            }

            tracing::info!("next update in {} seconds", self.interval.as_secs_f64());
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.wait_for(|&stop| stop) => break,
            }
        }

        tracing::info!(cycles = completed, "service loop stopped");
        Ok(completed)
    }
}
