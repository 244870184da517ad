//! Consul HTTP catalog client.
//!
//! # Responsibilities
//! - Query `/v1/health/service/<service>` for entries with their checks
//! - Register a node + service with one passing check
//! - Deregister the service entry of a node

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::registry::{CheckStatus, Registry, RegistryError, ServiceEntry};

const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Registry backed by a Consul agent's HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: reqwest::Client,
    base: Url,
    datacenter: Option<String>,
}

impl ConsulRegistry {
    /// Create a client for the agent at `address` (e.g. `http://127.0.0.1:8500`).
    pub fn new(address: &str, datacenter: Option<String>) -> Result<Self, RegistryError> {
        Self::with_timeout(address, datacenter, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        address: &str,
        datacenter: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let base = Url::parse(address)
            .map_err(|e| RegistryError::InvalidAddress(format!("{}: {}", address, e)))?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::InvalidAddress(address.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base,
            datacenter,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base() was rejected in the constructor.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if let Some(dc) = &self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        url
    }

    async fn put_json<T: Serialize>(&self, url: Url, body: &T) -> Result<(), RegistryError> {
        let response = self.client.put(url).json(body).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn service_entries(&self, service: &str) -> Result<Vec<ServiceEntry>, RegistryError> {
        let url = self.endpoint(&["v1", "health", "service", service]);
        let response = self.client.get(url).send().await?;
        let entries: Vec<HealthEntry> = check_status(response).await?.json().await?;

        Ok(entries.into_iter().map(ServiceEntry::from).collect())
    }

    async fn register(
        &self,
        service: &str,
        hostname: &str,
        address: &str,
    ) -> Result<(), RegistryError> {
        let body = CatalogRegistration::new(service, hostname, address, self.datacenter.as_deref());
        self.put_json(self.endpoint(&["v1", "catalog", "register"]), &body)
            .await?;

        tracing::debug!(service, hostname, address, "Registered in Consul catalog");
        Ok(())
    }

    async fn deregister(&self, service: &str, hostname: &str) -> Result<(), RegistryError> {
        let body = CatalogDeregistration {
            datacenter: self.datacenter.as_deref(),
            node: hostname,
            service_id: service_id(service, hostname),
        };
        self.put_json(self.endpoint(&["v1", "catalog", "deregister"]), &body)
            .await?;

        tracing::debug!(service, hostname, "Deregistered from Consul catalog");
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Status {
        status: status.as_u16(),
        body,
    })
}

fn service_id(service: &str, hostname: &str) -> String {
    format!("{}_{}", service, hostname)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: HealthNode,
    #[serde(default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    node: String,
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheck {
    status: String,
}

impl From<HealthEntry> for ServiceEntry {
    fn from(entry: HealthEntry) -> Self {
        ServiceEntry {
            node: entry.node.node,
            address: entry.node.address,
            checks: entry
                .checks
                .iter()
                .map(|c| CheckStatus::parse(&c.status))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogRegistration<'a> {
    #[serde(rename = "ID")]
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    datacenter: Option<&'a str>,
    node: &'a str,
    address: &'a str,
    service: CatalogService<'a>,
    checks: Vec<CatalogCheck<'a>>,
}

impl<'a> CatalogRegistration<'a> {
    fn new(service: &'a str, hostname: &'a str, address: &'a str, dc: Option<&'a str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            datacenter: dc,
            node: hostname,
            address,
            service: CatalogService {
                id: service_id(service, hostname),
                service,
            },
            checks: vec![CatalogCheck {
                node: hostname,
                check_id: Uuid::new_v4().to_string(),
                name: "instance-manager registration",
                status: CheckStatus::Passing.as_str(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogService<'a> {
    #[serde(rename = "ID")]
    id: String,
    service: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogCheck<'a> {
    node: &'a str,
    #[serde(rename = "CheckID")]
    check_id: String,
    name: &'a str,
    status: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogDeregistration<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    datacenter: Option<&'a str>,
    node: &'a str,
    #[serde(rename = "ServiceID")]
    service_id: String,
}
