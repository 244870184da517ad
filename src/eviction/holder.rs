//! Pending eviction holder.
//!
//! Debounces Down observations: an instance reported down is only finalized
//! as removed once `hold` elapses without a recovery canceling it.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::eviction::scheduler::{DelayScheduler, Fired, SchedulerError, Ticket};
use crate::lifecycle::ShutdownSignal;
use crate::membership::{Endpoint, InstanceChange};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum HolderError {
    #[error("scheduling removal of {name}: {source}")]
    Schedule {
        name: String,
        #[source]
        source: SchedulerError,
    },

    #[error("canceling removal of {name}: {source}")]
    Cancel {
        name: String,
        #[source]
        source: SchedulerError,
    },

    #[error("eviction output stream closed by consumer")]
    SinkClosed,

    #[error("pending holder is already running")]
    AlreadyRunning,
}

/// A finalize-removal whose grace period elapsed uncanceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Always a down change.
    pub change: InstanceChange,
    /// Ticket returned by the `add` that armed this removal.
    pub ticket: Ticket,
}

/// Where the membership table sends Down intents and recoveries.
pub trait EvictionSink {
    /// Arm (or re-arm) the finalize timer for `endpoint`.
    fn schedule(&self, endpoint: &Endpoint) -> Result<Ticket, HolderError>;

    /// Disarm the timer for `name`. Returns whether one was armed.
    fn cancel(&self, name: &str) -> Result<bool, HolderError>;
}

pub struct PendingHolder {
    hold: Duration,
    scheduler: DelayScheduler<InstanceChange>,
    fired: Mutex<mpsc::Receiver<Fired<InstanceChange>>>,
    out: mpsc::Sender<Eviction>,
}

impl PendingHolder {
    pub fn new(hold: Duration, buffer: usize) -> (Self, mpsc::Receiver<Eviction>) {
        let (scheduler, fired) = DelayScheduler::new(buffer);
        let (out, rx) = mpsc::channel(buffer);
        let holder = Self {
            hold,
            scheduler,
            fired: Mutex::new(fired),
            out,
        };
        (holder, rx)
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Schedule the removal of `endpoint` after the hold duration.
    ///
    /// An earlier schedule for the same name is superseded.
    pub fn add(&self, endpoint: &Endpoint) -> Result<Ticket, HolderError> {
        let ticket = self
            .scheduler
            .schedule(&endpoint.name, InstanceChange::down(endpoint.clone()), self.hold)
            .map_err(|source| HolderError::Schedule {
                name: endpoint.name.clone(),
                source,
            })?;

        tracing::debug!(
            instance = %endpoint,
            ticket,
            hold_ms = self.hold.as_millis() as u64,
            "Scheduled pending removal"
        );
        metrics::record_scheduled_evictions(self.scheduler.len());
        Ok(ticket)
    }

    /// Cancel the pending removal of `name`, if any.
    pub fn remove(&self, name: &str) -> Result<bool, HolderError> {
        let canceled = self
            .scheduler
            .unschedule(name)
            .map_err(|source| HolderError::Cancel {
                name: name.to_string(),
                source,
            })?;

        if canceled {
            tracing::debug!(instance = %name, "Canceled pending removal");
            metrics::record_scheduled_evictions(self.scheduler.len());
        }
        Ok(canceled)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.scheduler.is_scheduled(name)
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Forward fired removals to the output stream until `signal` fires.
    ///
    /// Every timer is stopped on exit; a holder does not outlive one run.
    pub async fn run(&self, signal: ShutdownSignal) -> Result<(), HolderError> {
        let mut fired = self
            .fired
            .try_lock()
            .map_err(|_| HolderError::AlreadyRunning)?;

        let result = self.forward(&mut fired, &signal).await;
        self.scheduler.stop();
        metrics::record_scheduled_evictions(0);
        result
    }

    async fn forward(
        &self,
        fired: &mut mpsc::Receiver<Fired<InstanceChange>>,
        signal: &ShutdownSignal,
    ) -> Result<(), HolderError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => break,
                next = fired.recv() => next,
            };
            let Some(event) = next else { break };

            tracing::info!(
                instance = %event.payload.endpoint,
                ticket = event.ticket,
                "Grace period elapsed, finalizing removal"
            );
            metrics::record_scheduled_evictions(self.scheduler.len());

            let eviction = Eviction {
                change: event.payload,
                ticket: event.ticket,
            };
            tokio::select! {
                biased;
                _ = signal.cancelled() => break,
                sent = self.out.send(eviction) => {
                    if sent.is_err() {
                        return Err(HolderError::SinkClosed);
                    }
                }
            }
        }

        tracing::info!("Pending holder received shutdown signal, exiting loop");
        Ok(())
    }
}

impl EvictionSink for PendingHolder {
    fn schedule(&self, endpoint: &Endpoint) -> Result<Ticket, HolderError> {
        self.add(endpoint)
    }

    fn cancel(&self, name: &str) -> Result<bool, HolderError> {
        self.remove(name)
    }
}
