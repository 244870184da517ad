//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! instance manager. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::routing::{HashAlgorithm, HashRing, DEFAULT_CAPACITY};

/// Root configuration for the instance manager daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManagerConfig {
    /// Tracked service, timers and rings.
    pub membership: MembershipConfig,

    /// Registry connection.
    pub registry: RegistryConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Membership tracking configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Registry service whose instances are tracked. Required.
    pub service_name: String,

    /// Registry poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Grace period before a failed instance is removed, in milliseconds.
    pub hold_duration_ms: u64,

    /// Capacity of the observer's change stream.
    pub observer_buffer: usize,

    /// Capacity of the holder's eviction stream.
    pub holder_buffer: usize,

    /// Hash function of the primary ring.
    pub hash: HashAlgorithm,

    /// Hash functions of additional rings, in order.
    pub backup_hashes: Vec<HashAlgorithm>,

    /// Anchor buckets per ring. A ring outgrowing it is rebuilt larger.
    pub ring_capacity: u16,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            poll_interval_ms: 1000,
            hold_duration_ms: 15_000,
            observer_buffer: 100,
            holder_buffer: 100,
            hash: HashAlgorithm::default(),
            backup_hashes: Vec::new(),
            ring_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl MembershipConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_millis(self.hold_duration_ms)
    }

    /// Primary hash first, then the backups.
    pub fn hash_algorithms(&self) -> impl Iterator<Item = HashAlgorithm> + '_ {
        std::iter::once(self.hash).chain(self.backup_hashes.iter().copied())
    }

    /// One empty ring per configured hash function.
    pub fn build_rings(&self) -> Vec<HashRing> {
        self.hash_algorithms()
            .map(|algorithm| HashRing::new(Arc::new(algorithm), self.ring_capacity))
            .collect()
    }
}

/// Registry connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Consul HTTP API base URL.
    pub address: String,

    /// Datacenter to query; the agent's own when unset.
    pub datacenter: Option<String>,

    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            datacenter: None,
            timeout_ms: 5000,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API key for authentication.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: ManagerConfig = toml::from_str(
            r#"
            [membership]
            service_name = "cache"
            "#,
        )
        .unwrap();

        assert_eq!(config.membership.service_name, "cache");
        assert_eq!(config.membership.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.membership.hold_duration(), Duration::from_secs(15));
        assert_eq!(config.membership.observer_buffer, 100);
        assert_eq!(config.membership.hash, HashAlgorithm::Fnv1a);
        assert!(config.membership.backup_hashes.is_empty());
        assert_eq!(config.registry.address, "http://127.0.0.1:8500");
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_full_config_parses() {
        let config: ManagerConfig = toml::from_str(
            r#"
            [membership]
            service_name = "cache"
            poll_interval_ms = 500
            hold_duration_ms = 1000
            hash = "murmur64"
            backup_hashes = ["fnv1a", "sip13"]
            ring_capacity = 256

            [registry]
            address = "http://consul.internal:8500"
            datacenter = "dc2"

            [observability]
            log_level = "debug"
            log_format = "json"
            metrics_enabled = false

            [admin]
            api_key = "secret"
            "#,
        )
        .unwrap();

        let algorithms: Vec<_> = config.membership.hash_algorithms().collect();
        assert_eq!(
            algorithms,
            vec![
                HashAlgorithm::Murmur64,
                HashAlgorithm::Fnv1a,
                HashAlgorithm::Sip13
            ]
        );
        assert_eq!(config.membership.build_rings().len(), 3);
        assert_eq!(config.registry.datacenter.as_deref(), Some("dc2"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.admin.api_key, "secret");
    }

    #[test]
    fn test_unknown_hash_is_parse_error() {
        let result: Result<ManagerConfig, _> = toml::from_str(
            r#"
            [membership]
            hash = "md5"
            "#,
        );
        assert!(result.is_err());
    }
}
