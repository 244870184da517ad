//! Membership client.
//!
//! # Responsibilities
//! - Run the observer, holder and merge loops for one tracked service
//! - Serve snapshot reads and key lookups from the shared table
//! - Pass registration and deregistration through to the registry
//!
//! # Design Decisions
//! - The merge loop is the only writer; it takes the write lock once per
//!   event and releases it before awaiting anything
//! - Any loop failing cancels the others through a run-local child signal
//! - Registry writes never touch the table; the next poll reflects them

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{validate_membership, MembershipConfig, ValidationError};
use crate::eviction::{Eviction, EvictionSink, HolderError, PendingHolder};
use crate::health::{HealthObserver, ObserverError};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::membership::table::{LookupError, MembershipTable, Transition};
use crate::membership::{Endpoint, Instance, InstanceChange};
use crate::observability::metrics;
use crate::registry::{Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid membership configuration: {}", join(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error("membership client is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Observer(#[from] ObserverError),

    #[error(transparent)]
    Holder(#[from] HolderError),

    #[error("{0} stream closed while the merge loop was running")]
    StreamClosed(&'static str),

    #[error("multiple membership loops failed: {}", join(.0))]
    Multiple(Vec<ClientError>),

    #[error("registering {hostname} in registry: {source}")]
    Register {
        hostname: String,
        #[source]
        source: RegistryError,
    },

    #[error("deregistering {hostname} from registry: {source}")]
    Deregister {
        hostname: String,
        #[source]
        source: RegistryError,
    },
}

fn join<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct Inner {
    config: MembershipConfig,
    registry: Arc<dyn Registry>,
    table: RwLock<MembershipTable>,
    running: AtomicBool,
}

/// Handle to the membership of one service. Cheap to clone.
#[derive(Clone)]
pub struct MembershipClient {
    inner: Arc<Inner>,
}

impl MembershipClient {
    /// Validate `config` and build an idle client with empty rings.
    pub fn new(config: MembershipConfig, registry: Arc<dyn Registry>) -> Result<Self, ClientError> {
        validate_membership(&config).map_err(ClientError::InvalidConfig)?;

        let table = MembershipTable::new(config.build_rings());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                table: RwLock::new(table),
                running: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Track the service until `signal` fires.
    ///
    /// Returns `Ok(())` on cancellation. A failing loop stops the other two
    /// and its error is returned; several failures are aggregated.
    pub async fn run(&self, signal: ShutdownSignal) -> Result<(), ClientError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.inner.running);

        self.write_table().clear();
        metrics::record_membership(0, 0);

        let config = &self.inner.config;
        tracing::info!(
            service = %config.service_name,
            rings = self.ring_count(),
            poll_interval_ms = config.poll_interval_ms,
            hold_duration_ms = config.hold_duration_ms,
            "Membership client starting"
        );

        let local = signal.child();
        let (changes_tx, changes_rx) = mpsc::channel(config.observer_buffer);
        let observer = HealthObserver::new(
            Arc::clone(&self.inner.registry),
            config.service_name.clone(),
            config.poll_interval(),
            changes_tx,
        );
        let (holder, evictions_rx) = PendingHolder::new(config.hold_duration(), config.holder_buffer);

        let (observed, held, merged) = tokio::join!(
            cancel_on_error(observer.run(local.subscribe()), &local),
            cancel_on_error(holder.run(local.subscribe()), &local),
            cancel_on_error(
                self.merge(changes_rx, evictions_rx, &holder, local.subscribe()),
                &local
            ),
        );

        let mut errors: Vec<ClientError> = [
            observed.err().map(ClientError::from),
            held.err().map(ClientError::from),
            merged.err(),
        ]
        .into_iter()
        .flatten()
        .collect();

        tracing::info!(
            service = %config.service_name,
            failures = errors.len(),
            "Membership client stopped"
        );
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ClientError::Multiple(errors)),
        }
    }

    async fn merge(
        &self,
        mut changes: mpsc::Receiver<InstanceChange>,
        mut evictions: mpsc::Receiver<Eviction>,
        holder: &PendingHolder,
        signal: ShutdownSignal,
    ) -> Result<(), ClientError> {
        // Cancellation is checked every iteration; the two streams are polled fairly.
        while !signal.is_cancelled() {
            tokio::select! {
                _ = signal.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => self.apply_change(&change, holder, &signal)?,
                    None if signal.is_cancelled() => break,
                    None => return Err(ClientError::StreamClosed("observer")),
                },
                eviction = evictions.recv() => match eviction {
                    Some(eviction) => self.apply_eviction(&eviction),
                    None if signal.is_cancelled() => break,
                    None => return Err(ClientError::StreamClosed("eviction")),
                },
            }
        }

        tracing::info!("Merge loop received shutdown signal, exiting loop");
        Ok(())
    }

    fn apply_change(
        &self,
        change: &InstanceChange,
        sink: &dyn EvictionSink,
        signal: &ShutdownSignal,
    ) -> Result<(), ClientError> {
        let applied = {
            let mut table = self.write_table();
            let applied = if change.is_down {
                table.apply_down(&change.endpoint, sink)
            } else {
                table.apply_up(&change.endpoint, sink)
            };
            if matches!(&applied, Ok(t) if t.changed_membership()) {
                let (alive, pending) = table.counts();
                metrics::record_membership(alive, pending);
            }
            applied
        };

        match applied {
            Ok(transition) => {
                log_transition(&change.endpoint, transition);
                Ok(())
            }
            Err(e) if signal.is_cancelled() => {
                tracing::debug!(
                    instance = %change.endpoint,
                    error = %e,
                    "Dropped change during shutdown"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_eviction(&self, eviction: &Eviction) {
        let transition = {
            let mut table = self.write_table();
            let transition = table.apply_eviction(eviction);
            if transition.changed_membership() {
                let (alive, pending) = table.counts();
                metrics::record_membership(alive, pending);
            }
            transition
        };
        log_transition(&eviction.change.endpoint, transition);
    }

    /// Every member, Alive and Pending, in no particular order.
    pub fn instances(&self) -> Vec<Instance> {
        self.read_table().instances()
    }

    /// Owner of `key` on the primary ring.
    pub fn data_holder(&self, key: &str) -> Result<Instance, LookupError> {
        self.read_table().holder(key)
    }

    /// Owners of `key` on every ring, deduplicated and sorted by name.
    pub fn data_holders(&self, key: &str) -> Result<Vec<Instance>, LookupError> {
        self.read_table().holders(key)
    }

    pub fn ring_count(&self) -> usize {
        self.read_table().ring_count()
    }

    /// Number of (alive, pending) members.
    pub fn counts(&self) -> (usize, usize) {
        self.read_table().counts()
    }

    /// Register `hostname` at `address` with a passing check.
    ///
    /// The table picks the instance up on the next poll.
    pub async fn register(&self, hostname: &str, address: &str) -> Result<(), ClientError> {
        self.inner
            .registry
            .register(&self.inner.config.service_name, hostname, address)
            .await
            .map_err(|source| ClientError::Register {
                hostname: hostname.to_string(),
                source,
            })?;
        tracing::info!(hostname, address, "Registered instance");
        Ok(())
    }

    pub async fn deregister(&self, hostname: &str) -> Result<(), ClientError> {
        self.inner
            .registry
            .deregister(&self.inner.config.service_name, hostname)
            .await
            .map_err(|source| ClientError::Deregister {
                hostname: hostname.to_string(),
                source,
            })?;
        tracing::info!(hostname, "Deregistered instance");
        Ok(())
    }

    fn read_table(&self) -> RwLockReadGuard<'_, MembershipTable> {
        self.inner.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, MembershipTable> {
        self.inner.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn cancel_on_error<T, E>(
    task: impl Future<Output = Result<T, E>>,
    local: &Shutdown,
) -> Result<T, E> {
    let result = task.await;
    if result.is_err() {
        local.trigger();
    }
    result
}

fn log_transition(endpoint: &Endpoint, transition: Transition) {
    metrics::record_transition(transition.kind());
    match transition {
        Transition::Joined => {
            tracing::info!(instance = %endpoint, "Instance joined");
        }
        Transition::Suspected(ticket) => {
            tracing::info!(instance = %endpoint, ticket, "Instance failing health, pending removal");
        }
        Transition::Recovered => {
            tracing::info!(instance = %endpoint, "Instance recovered within grace period");
        }
        Transition::Evicted => {
            tracing::info!(instance = %endpoint, "Instance removed");
        }
        Transition::Unchanged => {
            tracing::trace!(instance = %endpoint, "Instance re-observed alive");
        }
        Transition::Ignored(reason) => {
            tracing::debug!(instance = %endpoint, reason = ?reason, "Ignored membership event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::InstanceStatus;
    use crate::registry::MemoryRegistry;
    use std::time::Duration;

    fn config() -> MembershipConfig {
        MembershipConfig {
            poll_interval_ms: 20,
            hold_duration_ms: 200,
            ..MembershipConfig::new("svc")
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = config();
        config.hold_duration_ms = 0;

        let err = MembershipClient::new(config, Arc::new(MemoryRegistry::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
        assert!(err.to_string().contains("hold_duration_ms"));
    }

    #[test]
    fn test_reads_before_run_are_empty() {
        let client = MembershipClient::new(config(), Arc::new(MemoryRegistry::new())).unwrap();
        assert!(client.instances().is_empty());
        assert!(matches!(
            client.data_holder("k"),
            Err(LookupError::EmptyRing { .. })
        ));
        assert_eq!(client.ring_count(), 1);
    }

    #[tokio::test]
    async fn test_run_tracks_registrations() {
        let registry = Arc::new(MemoryRegistry::new());
        let client = MembershipClient::new(config(), registry.clone()).unwrap();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn({
            let client = client.clone();
            let signal = shutdown.subscribe();
            async move { client.run(signal).await }
        });

        client.register("node-a", "10.0.0.1:80").await.unwrap();
        assert!(eventually(|| client.instances().len() == 1).await);
        let holder = client.data_holder("some-key").unwrap();
        assert_eq!(holder.name(), "node-a");
        assert_eq!(holder.status(), InstanceStatus::Alive);

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let client = MembershipClient::new(config(), Arc::new(MemoryRegistry::new())).unwrap();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn({
            let client = client.clone();
            let signal = shutdown.subscribe();
            async move { client.run(signal).await }
        });
        assert!(eventually(|| client.is_running()).await);

        let second = client.run(shutdown.subscribe()).await;
        assert!(matches!(second, Err(ClientError::AlreadyRunning)));

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_restart_resets_table() {
        let registry = Arc::new(MemoryRegistry::new());
        let client = MembershipClient::new(config(), registry.clone()).unwrap();
        client.register("node-a", "addr").await.unwrap();

        let shutdown = Shutdown::new();
        let handle = tokio::spawn({
            let client = client.clone();
            let signal = shutdown.subscribe();
            async move { client.run(signal).await }
        });
        assert!(eventually(|| client.instances().len() == 1).await);
        shutdown.trigger();
        handle.await.unwrap().unwrap();

        // Gone from the registry while stopped: a fresh run must not keep it.
        client.deregister("node-a").await.unwrap();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn({
            let client = client.clone();
            let signal = shutdown.subscribe();
            async move { client.run(signal).await }
        });
        assert!(eventually(|| client.is_running()).await);
        assert!(eventually(|| client.instances().is_empty()).await);

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_change_stream_does_not_starve_evictions() {
        let client = MembershipClient::new(config(), Arc::new(MemoryRegistry::new())).unwrap();
        let (holder, _fired) = PendingHolder::new(Duration::from_secs(60), 16);

        let victim = Endpoint::new("victim", "10.0.0.9:80");
        let ticket = {
            let mut table = client.write_table();
            table.apply_up(&victim, &holder).unwrap();
            match table.apply_down(&victim, &holder).unwrap() {
                Transition::Suspected(ticket) => ticket,
                other => panic!("expected suspicion, got {:?}", other),
            }
        };

        let (changes_tx, changes_rx) = mpsc::channel(64);
        let (evictions_tx, evictions_rx) = mpsc::channel(4);
        let producer = tokio::spawn(async move {
            let filler = InstanceChange::up(Endpoint::new("filler", "10.0.0.1:80"));
            while changes_tx.send(filler.clone()).await.is_ok() {}
        });

        let shutdown = Shutdown::new();
        let merge = tokio::spawn({
            let client = client.clone();
            let signal = shutdown.subscribe();
            async move {
                client
                    .merge(changes_rx, evictions_rx, &holder, signal)
                    .await
            }
        });

        assert!(eventually(|| client.instances().len() == 2).await);
        evictions_tx
            .send(Eviction {
                change: InstanceChange::down(victim),
                ticket,
            })
            .await
            .unwrap();

        assert!(eventually(|| client.instances().iter().all(|i| i.name() != "victim")).await);

        shutdown.trigger();
        merge.await.unwrap().unwrap();
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_write_errors_carry_context() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.set_unavailable(true);
        let client = MembershipClient::new(config(), registry).unwrap();

        let err = client.register("node-a", "addr").await.unwrap_err();
        assert!(matches!(err, ClientError::Register { .. }));
        assert!(err.to_string().starts_with("registering node-a in registry: "));

        let err = client.deregister("node-a").await.unwrap_err();
        assert!(err.to_string().starts_with("deregistering node-a from registry: "));
    }
}
