//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (durations > 0, buffers > 0)
//! - Validate addresses (socket addresses parse, registry URL present)
//! - Detect a hash function used for more than one ring
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{ManagerConfig, MembershipConfig};

/// A single semantic problem, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate the whole daemon configuration.
pub fn validate_config(config: &ManagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = membership_errors(&config.membership);

    if config.registry.address.trim().is_empty() {
        errors.push(ValidationError::new("registry.address", "must not be empty"));
    }
    if config.registry.timeout_ms == 0 {
        errors.push(ValidationError::new("registry.timeout_ms", "must be greater than 0"));
    }

    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the membership section alone, as embedders construct it.
pub fn validate_membership(config: &MembershipConfig) -> Result<(), Vec<ValidationError>> {
    let errors = membership_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn membership_errors(config: &MembershipConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::new("membership.service_name", "is required"));
    }

    let positive = [
        ("membership.poll_interval_ms", config.poll_interval_ms as usize),
        ("membership.hold_duration_ms", config.hold_duration_ms as usize),
        ("membership.observer_buffer", config.observer_buffer),
        ("membership.holder_buffer", config.holder_buffer),
        ("membership.ring_capacity", config.ring_capacity as usize),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let mut seen = HashSet::new();
    for algorithm in config.hash_algorithms() {
        if !seen.insert(algorithm) {
            errors.push(ValidationError::new(
                "membership.backup_hashes",
                format!("hash function {} is used by more than one ring", algorithm),
            ));
        }
    }

    errors
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("invalid socket address {:?}", value),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::HashAlgorithm;

    fn valid() -> ManagerConfig {
        ManagerConfig {
            membership: MembershipConfig::new("cache"),
            ..ManagerConfig::default()
        }
    }

    #[test]
    fn test_defaults_with_service_name_are_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn test_missing_service_name() {
        let errors = validate_config(&ManagerConfig::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "membership.service_name");
    }

    #[test]
    fn test_error_display_names_field() {
        let mut config = MembershipConfig::new("cache");
        config.ring_capacity = 0;

        let errors = validate_membership(&config).unwrap_err();
        let error: &dyn std::error::Error = &errors[0];
        assert_eq!(error.to_string(), "membership.ring_capacity: must be greater than 0");
    }

    #[test]
    fn test_all_errors_reported_at_once() {
        let mut config = valid();
        config.membership.poll_interval_ms = 0;
        config.membership.hold_duration_ms = 0;
        config.membership.holder_buffer = 0;
        config.admin.bind_address = "not-an-address".to_string();

        let fields: Vec<_> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "membership.poll_interval_ms",
                "membership.hold_duration_ms",
                "membership.holder_buffer",
                "admin.bind_address",
            ]
        );
    }

    #[test]
    fn test_duplicate_hash_function_rejected() {
        let mut config = MembershipConfig::new("cache");
        config.backup_hashes = vec![HashAlgorithm::Murmur64, HashAlgorithm::Fnv1a];

        let errors = validate_membership(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("fnv1a"));
    }

    #[test]
    fn test_disabled_surfaces_skip_address_checks() {
        let mut config = valid();
        config.admin.enabled = false;
        config.admin.bind_address = String::new();
        config.observability.metrics_enabled = false;
        config.observability.metrics_address = String::new();

        assert_eq!(validate_config(&config), Ok(()));
    }
}
