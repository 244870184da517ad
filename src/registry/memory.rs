//! In-process registry.
//!
//! A catalog held in memory, for embedding the membership client without a
//! Consul agent and for exercising failure paths in tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::registry::{CheckStatus, Registry, RegistryError, ServiceEntry};

type Catalog = HashMap<String, BTreeMap<String, ServiceEntry>>;

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    services: Mutex<Catalog>,
    unavailable: AtomicBool,
    queries: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the health of a registered host. Returns `false` if the host
    /// is not registered for `service`.
    pub fn set_status(&self, service: &str, hostname: &str, status: CheckStatus) -> bool {
        let mut services = self.catalog();
        match services.get_mut(service).and_then(|s| s.get_mut(hostname)) {
            Some(entry) => {
                entry.checks = vec![status];
                true
            }
            None => false,
        }
    }

    /// Make every call fail with [`RegistryError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `service_entries` calls served or refused so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable(
                "in-memory registry switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn service_entries(&self, service: &str) -> Result<Vec<ServiceEntry>, RegistryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        Ok(self
            .catalog()
            .get(service)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn register(
        &self,
        service: &str,
        hostname: &str,
        address: &str,
    ) -> Result<(), RegistryError> {
        self.ensure_available()?;

        self.catalog().entry(service.to_string()).or_default().insert(
            hostname.to_string(),
            ServiceEntry {
                node: hostname.to_string(),
                address: address.to_string(),
                checks: vec![CheckStatus::Passing],
            },
        );
        Ok(())
    }

    async fn deregister(&self, service: &str, hostname: &str) -> Result<(), RegistryError> {
        self.ensure_available()?;

        if let Some(entries) = self.catalog().get_mut(service) {
            entries.remove(hostname);
        }
        Ok(())
    }
}
