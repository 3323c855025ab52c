//! Controller configuration from environment variables

use std::env;
use std::str::FromStr;
use thiserror::Error;
use tracing::Level;

use van_core::Lifetime;

/// Configuration error; aborts start-up
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Lifetimes and leases applied by the certificate pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CertificatePolicy {
    /// Network CA lifetime when the network has no end time
    pub ca_lifetime: Lifetime,

    /// Lifetime of certificates whose request names no expiration
    pub leaf_lifetime: Lifetime,

    /// Age after which a processing claim is considered abandoned
    pub request_lease: chrono::Duration,

    /// Lifetime of a bootstrapped backbone interior CA
    pub backbone_ca_lifetime: Lifetime,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            ca_lifetime: Lifetime::years(1),
            leaf_lifetime: Lifetime::days(90),
            request_lease: chrono::Duration::seconds(300),
            backbone_ca_lifetime: Lifetime::years(5),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub port: u16,

    /// PostgreSQL URL; the in-memory store is used when absent
    pub database_url: Option<String>,

    pub policy: CertificatePolicy,

    /// Backbone created at start-up when missing
    pub backbone_name: String,

    pub log_level: Level,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            database_url: None,
            policy: CertificatePolicy::default(),
            backbone_name: "default".into(),
            log_level: Level::INFO,
        }
    }
}

impl ControllerConfig {
    /// Read `VAN_*` variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let policy = CertificatePolicy {
            ca_lifetime: parse_or(&lookup, "VAN_DEFAULT_CA_LIFETIME", defaults.policy.ca_lifetime)?,
            leaf_lifetime: parse_or(&lookup, "VAN_DEFAULT_CERT_LIFETIME", defaults.policy.leaf_lifetime)?,
            request_lease: chrono::Duration::seconds(parse_or(
                &lookup,
                "VAN_REQUEST_LEASE_SECS",
                defaults.policy.request_lease.num_seconds(),
            )?),
            backbone_ca_lifetime: defaults.policy.backbone_ca_lifetime,
        };
        if policy.request_lease <= chrono::Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "VAN_REQUEST_LEASE_SECS",
                value: policy.request_lease.num_seconds().to_string(),
                reason: "lease must be positive".into(),
            });
        }

        Ok(Self {
            port: parse_or(&lookup, "VAN_CONTROLLER_PORT", defaults.port)?,
            database_url: lookup("VAN_DATABASE_URL").filter(|s| !s.is_empty()),
            policy,
            backbone_name: lookup("VAN_BACKBONE_NAME").unwrap_or(defaults.backbone_name),
            log_level: parse_or(&lookup, "VAN_LOG_LEVEL", defaults.log_level)?,
        })
    }
}

/// Parse `var` when set, otherwise return `default`
pub fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
