//! Registry health observer.
//!
//! # Responsibilities
//! - Poll the registry once on start, then on a fixed interval
//! - Diff the passing set against the previous poll
//! - Emit one Up/Down change per difference onto a bounded stream

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::ShutdownSignal;
use crate::membership::{Endpoint, InstanceChange};
use crate::observability::metrics;
use crate::registry::{Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("observer output stream closed by consumer")]
    SinkClosed,
}

/// Result of comparing two consecutive passing sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Present now, absent last poll.
    pub upped: Vec<Endpoint>,
    /// Present last poll, absent now.
    pub downed: Vec<Endpoint>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.upped.is_empty() && self.downed.is_empty()
    }
}

/// Set difference in both directions, by name + address.
pub fn diff(previous: &HashSet<Endpoint>, current: &HashSet<Endpoint>) -> SnapshotDiff {
    let mut upped: Vec<Endpoint> = current.difference(previous).cloned().collect();
    let mut downed: Vec<Endpoint> = previous.difference(current).cloned().collect();
    upped.sort();
    downed.sort();
    SnapshotDiff { upped, downed }
}

pub struct HealthObserver {
    registry: Arc<dyn Registry>,
    service: String,
    interval: Duration,
    sink: mpsc::Sender<InstanceChange>,
    snapshot: HashSet<Endpoint>,
}

impl HealthObserver {
    pub fn new(
        registry: Arc<dyn Registry>,
        service: impl Into<String>,
        interval: Duration,
        sink: mpsc::Sender<InstanceChange>,
    ) -> Self {
        Self {
            registry,
            service: service.into(),
            interval,
            sink,
            snapshot: HashSet::new(),
        }
    }

    /// Instances seen passing on the last successful poll.
    pub fn snapshot(&self) -> &HashSet<Endpoint> {
        &self.snapshot
    }

    /// Run the poll loop until `signal` fires.
    ///
    /// Emission blocks when the stream is full, delaying the next poll.
    /// Registry failures are logged and retried on the next tick.
    pub async fn run(mut self, signal: ShutdownSignal) -> Result<(), ObserverError> {
        tracing::info!(
            service = %self.service,
            interval_ms = self.interval.as_millis() as u64,
            "Health observer starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = signal.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = signal.cancelled() => break,
                fetched = self.fetch_alive() => fetched,
            };

            let alive = match fetched {
                Ok(alive) => alive,
                Err(e) => {
                    tracing::warn!(
                        service = %self.service,
                        error = %e,
                        "Registry poll failed, retrying next tick"
                    );
                    continue;
                }
            };

            for change in self.replace_snapshot(alive) {
                tracing::debug!(
                    instance = %change.endpoint,
                    is_down = change.is_down,
                    "Observed health change"
                );
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        tracing::info!("Health observer received shutdown signal, exiting loop");
                        return Ok(());
                    }
                    sent = self.sink.send(change) => {
                        if sent.is_err() {
                            return Err(ObserverError::SinkClosed);
                        }
                    }
                }
            }
        }

        tracing::info!("Health observer received shutdown signal, exiting loop");
        Ok(())
    }

    async fn fetch_alive(&self) -> Result<HashSet<Endpoint>, RegistryError> {
        let started = Instant::now();
        let result = self.registry.service_entries(&self.service).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_poll(outcome, started.elapsed());

        Ok(result?
            .into_iter()
            .filter(|entry| entry.is_passing())
            .map(|entry| Endpoint::new(entry.node, entry.address))
            .collect())
    }

    /// Swap in `alive` as the whole snapshot and return the changes it implies.
    ///
    /// Downs come before ups so an address change reads as leave-then-join.
    fn replace_snapshot(&mut self, alive: HashSet<Endpoint>) -> Vec<InstanceChange> {
        let diff = diff(&self.snapshot, &alive);
        self.snapshot = alive;

        diff.downed
            .into_iter()
            .map(InstanceChange::down)
            .chain(diff.upped.into_iter().map(InstanceChange::up))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::registry::{CheckStatus, MemoryRegistry};

    const SERVICE: &str = "svc";

    fn set(endpoints: &[(&str, &str)]) -> HashSet<Endpoint> {
        endpoints
            .iter()
            .map(|(name, addr)| Endpoint::new(*name, *addr))
            .collect()
    }

    fn observer(
        registry: Arc<MemoryRegistry>,
        buffer: usize,
    ) -> (HealthObserver, mpsc::Receiver<InstanceChange>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            HealthObserver::new(registry, SERVICE, Duration::from_millis(20), tx),
            rx,
        )
    }

    async fn next(rx: &mut mpsc::Receiver<InstanceChange>) -> InstanceChange {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for change")
            .expect("stream closed")
    }

    #[test]
    fn test_diff_both_directions() {
        let previous = set(&[("a", "1"), ("b", "2")]);
        let current = set(&[("b", "2"), ("c", "3")]);

        let diff = diff(&previous, &current);
        assert_eq!(diff.upped, vec![Endpoint::new("c", "3")]);
        assert_eq!(diff.downed, vec![Endpoint::new("a", "1")]);
    }

    #[test]
    fn test_diff_address_change_is_down_plus_up() {
        let diff = diff(&set(&[("a", "old")]), &set(&[("a", "new")]));
        assert_eq!(diff.upped, vec![Endpoint::new("a", "new")]);
        assert_eq!(diff.downed, vec![Endpoint::new("a", "old")]);
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let s = set(&[("a", "1")]);
        assert!(diff(&s, &s).is_empty());
    }

    #[test]
    fn test_snapshot_fully_replaced_each_poll() {
        let (tx, _rx) = mpsc::channel(8);
        let mut observer = HealthObserver::new(
            Arc::new(MemoryRegistry::new()),
            SERVICE,
            Duration::from_secs(1),
            tx,
        );

        let polls = [
            set(&[("a", "1"), ("b", "2")]),
            set(&[("b", "2"), ("c", "3")]),
            set(&[("c", "3")]),
            set(&[]),
            set(&[("a", "1")]),
        ];
        let mut previous = HashSet::new();
        for alive in polls {
            let changes = observer.replace_snapshot(alive.clone());
            let expected = diff(&previous, &alive);

            let downs = changes.iter().filter(|c| c.is_down).count();
            let ups = changes.iter().filter(|c| !c.is_down).count();
            assert_eq!(downs, expected.downed.len());
            assert_eq!(ups, expected.upped.len());
            assert_eq!(observer.snapshot(), &alive, "stale snapshot entries left over");
            previous = alive;
        }
    }

    #[test]
    fn test_replace_snapshot_orders_downs_first() {
        let (tx, _rx) = mpsc::channel(8);
        let mut observer = HealthObserver::new(
            Arc::new(MemoryRegistry::new()),
            SERVICE,
            Duration::from_secs(1),
            tx,
        );
        observer.replace_snapshot(set(&[("a", "old")]));

        let changes = observer.replace_snapshot(set(&[("a", "new")]));
        assert_eq!(
            changes,
            vec![
                InstanceChange::down(Endpoint::new("a", "old")),
                InstanceChange::up(Endpoint::new("a", "new")),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_emits_up_then_down() {
        let registry = Arc::new(MemoryRegistry::new());
        let (observer, mut rx) = observer(registry.clone(), 16);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(observer.run(shutdown.subscribe()));

        registry.register(SERVICE, "host1", "addr1").await.unwrap();
        assert_eq!(
            next(&mut rx).await,
            InstanceChange::up(Endpoint::new("host1", "addr1"))
        );

        registry.set_status(SERVICE, "host1", CheckStatus::Critical);
        assert_eq!(
            next(&mut rx).await,
            InstanceChange::down(Endpoint::new("host1", "addr1"))
        );

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_survives_registry_failures() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register(SERVICE, "host1", "addr1").await.unwrap();
        registry.set_unavailable(true);

        let (observer, mut rx) = observer(registry.clone(), 16);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(observer.run(shutdown.subscribe()));

        while registry.query_count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rx.try_recv().is_err(), "failed polls must not emit");

        registry.set_unavailable(false);
        assert_eq!(
            next(&mut rx).await,
            InstanceChange::up(Endpoint::new("host1", "addr1"))
        );

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_promptly_while_blocked_on_full_stream() {
        let registry = Arc::new(MemoryRegistry::new());
        for i in 0..4 {
            registry
                .register(SERVICE, &format!("host{}", i), "addr")
                .await
                .unwrap();
        }

        // Capacity 1 and nobody reading: the loop parks on emission.
        let (observer, _rx) = observer(registry.clone(), 1);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(observer.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.query_count(), 1, "backpressure should delay polling");

        shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("observer did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_fails_when_consumer_hangs_up() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register(SERVICE, "host1", "addr1").await.unwrap();

        let (observer, rx) = observer(registry, 4);
        drop(rx);

        let result = observer.run(Shutdown::new().subscribe()).await;
        assert!(matches!(result, Err(ObserverError::SinkClosed)));
    }
}
