//! Service registry boundary.
//!
//! # Data Flow
//! ```text
//! HealthObserver (every poll)
//!     → Registry::service_entries(service)
//!     → ServiceEntry::aggregated_status() == Passing
//!     → candidate alive set
//!
//! MembershipClient::register / deregister
//!     → Registry::register / deregister (pass-through)
//!     → visible in the table after the next poll
//! ```
//!
//! # Design Decisions
//! - The registry is a trait object so the Consul client and the in-memory
//!   catalog are interchangeable
//! - Health is aggregated per entry here, filtered by the observer
//! - No retries at this layer; the observer simply polls again

pub mod consul;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use consul::ConsulRegistry;
pub use memory::MemoryRegistry;

/// Errors raised by a registry backend.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level failure talking to the registry.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with a non-success status.
    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The configured registry address cannot be used.
    #[error("invalid registry address: {0}")]
    InvalidAddress(String),

    /// The registry refused to serve the request.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Status of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
}

impl CheckStatus {
    /// Parse a registry status string. Unknown values count as critical.
    pub fn parse(value: &str) -> Self {
        match value {
            "passing" => CheckStatus::Passing,
            "warning" => CheckStatus::Warning,
            "maintenance" => CheckStatus::Maintenance,
            _ => CheckStatus::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
            CheckStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry entry for the tracked service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Node name, used as the instance name.
    pub node: String,
    /// Node address, used as the routing address.
    pub address: String,
    /// Individual check results attached to the entry.
    pub checks: Vec<CheckStatus>,
}

impl ServiceEntry {
    /// Fold all checks into one status.
    ///
    /// Maintenance dominates critical, which dominates warning. An entry with
    /// no checks is passing.
    pub fn aggregated_status(&self) -> CheckStatus {
        let mut status = CheckStatus::Passing;
        for check in &self.checks {
            match check {
                CheckStatus::Maintenance => return CheckStatus::Maintenance,
                CheckStatus::Critical => status = CheckStatus::Critical,
                CheckStatus::Warning if status == CheckStatus::Passing => {
                    status = CheckStatus::Warning
                }
                _ => {}
            }
        }
        status
    }

    pub fn is_passing(&self) -> bool {
        self.aggregated_status() == CheckStatus::Passing
    }
}

/// A service catalog the membership client observes and writes to.
#[async_trait]
pub trait Registry: Send + Sync {
    /// List every entry registered for `service`, healthy or not.
    async fn service_entries(&self, service: &str) -> Result<Vec<ServiceEntry>, RegistryError>;

    /// Create a catalog entry for `hostname` with a passing health check.
    async fn register(
        &self,
        service: &str,
        hostname: &str,
        address: &str,
    ) -> Result<(), RegistryError>;

    /// Remove the catalog entry for `hostname`.
    async fn deregister(&self, service: &str, hostname: &str) -> Result<(), RegistryError>;
}
