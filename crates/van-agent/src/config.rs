//! Agent configuration from environment variables

use std::env;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

use van_core::{InvitationId, MemberSiteId};

use crate::error::{AgentError, Result};

/// How the agent obtains its site identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteIdentity {
    /// Already admitted as this member site
    Site(MemberSiteId),
    /// Claim this invitation under `name` on start-up
    Claim { invitation: InvitationId, name: String },
}

/// Site agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Controller base URL, e.g. `http://controller:8085`
    pub controller_url: String,

    pub identity: SiteIdentity,

    pub heartbeat_interval: Duration,

    /// Address reported with each heartbeat
    pub address: Option<String>,

    pub log_level: Level,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup
    ///
    /// `VAN_SITE_ID` wins over `VAN_CLAIM_ID` when both are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let controller_url = get("VAN_CONTROLLER_URL")
            .ok_or_else(|| AgentError::Config("VAN_CONTROLLER_URL is required".into()))?;

        let identity = match (get("VAN_SITE_ID"), get("VAN_CLAIM_ID")) {
            (Some(site), _) => SiteIdentity::Site(parse_uuid("VAN_SITE_ID", &site)?),
            (None, Some(claim)) => SiteIdentity::Claim {
                invitation: parse_uuid("VAN_CLAIM_ID", &claim)?,
                name: get("VAN_SITE_NAME").ok_or_else(|| {
                    AgentError::Config("VAN_SITE_NAME is required with VAN_CLAIM_ID".into())
                })?,
            },
            (None, None) => {
                return Err(AgentError::Config(
                    "one of VAN_SITE_ID or VAN_CLAIM_ID is required".into(),
                ))
            }
        };

        let heartbeat_secs: u64 = match get("VAN_HEARTBEAT_SECS") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| AgentError::Config(format!("VAN_HEARTBEAT_SECS: {}", e)))?,
            None => 30,
        };
        if heartbeat_secs == 0 {
            return Err(AgentError::Config("VAN_HEARTBEAT_SECS must be positive".into()));
        }

        let log_level = match get("VAN_LOG_LEVEL") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| AgentError::Config(format!("VAN_LOG_LEVEL: {}", e)))?,
            None => Level::INFO,
        };

        Ok(Self {
            controller_url,
            identity,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            address: get("VAN_SITE_ADDRESS"),
            log_level,
        })
    }
}

fn parse_uuid(var: &str, value: &str) -> Result<Uuid> {
    value
        .trim()
        .parse()
        .map_err(|e| AgentError::Config(format!("{}: {}", var, e)))
}
