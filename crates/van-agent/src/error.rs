//! Error types for the site agent

use thiserror::Error;

use van_core::ProtocolError;

/// Result type alias using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by the site agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// Transport failure talking to the controller
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The controller answered with a failure, or an undecodable reply
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A fetched object's data does not match its hash
    #[error("Object '{0}' failed hash verification")]
    Corrupt(String),

    /// The agent has no site identity yet
    #[error("Site has no identity; claim an invitation first")]
    Unclaimed,

    /// Invalid agent configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Protocol status of a controller rejection, if this is one
    pub fn rejection_status(&self) -> Option<u16> {
        match self {
            AgentError::Protocol(ProtocolError::Rejected { status_code, .. }) => Some(*status_code),
            _ => None,
        }
    }
}
