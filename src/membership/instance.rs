//! Membership data types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry-level identity of a service instance.
///
/// Two observations are the same instance only if both name and address
/// match; an address change is seen as one instance leaving and another
/// arriving.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique instance name (the registry node name).
    pub name: String,
    /// Routing address.
    pub address: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Membership status of an instance present in the table.
///
/// Absence from the table means "not a member"; there is no `Absent` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Passing health; routable.
    Alive,
    /// Failed health, inside the grace period; still routable while draining.
    Pending,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Alive => "alive",
            InstanceStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of the instance table, as handed out to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    name: String,
    address: String,
    status: InstanceStatus,
}

impl Instance {
    pub(crate) fn new(endpoint: &Endpoint, status: InstanceStatus) -> Self {
        Self {
            name: endpoint.name.clone(),
            address: endpoint.address.clone(),
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn is_alive(&self) -> bool {
        self.status == InstanceStatus::Alive
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.name.clone(), self.address.clone())
    }

    pub(crate) fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
    }

    pub(crate) fn set_address(&mut self, address: &str) {
        if self.address != address {
            self.address = address.to_string();
        }
    }
}

/// An up or down observation, or a finalized removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceChange {
    pub endpoint: Endpoint,
    pub is_down: bool,
}

impl InstanceChange {
    pub fn up(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            is_down: false,
        }
    }

    pub fn down(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            is_down: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_identity_includes_address() {
        let a = Endpoint::new("node-a", "10.0.0.1:8080");
        let moved = Endpoint::new("node-a", "10.0.0.2:8080");
        assert_ne!(a, moved);
        assert_eq!(a, Endpoint::new("node-a", "10.0.0.1:8080"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let instance = Instance::new(&Endpoint::new("n", "addr"), InstanceStatus::Pending);
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["name"], "n");
    }

    #[test]
    fn test_change_constructors() {
        let e = Endpoint::new("n", "addr");
        assert!(!InstanceChange::up(e.clone()).is_down);
        assert!(InstanceChange::down(e).is_down);
    }
}
