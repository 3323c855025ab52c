//! VAN Site Agent
//!
//! The site side of the synchronization protocol:
//! - Claims a site identity from an invitation (CLAIM)
//! - Keeps a local cache of named configuration objects
//! - Reconciles the cache by heartbeat hash-set comparison and GET
//!
//! ```ignore
//! let mut agent = SiteAgent::new(HttpTransport::new("http://controller:8085"));
//! agent.claim(invitation, "edge-1").await?;
//! agent.reconcile().await?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod transport;

pub use agent::{ObjectCache, ReconcileReport, SiteAgent};
pub use config::{AgentConfig, SiteIdentity};
pub use error::{AgentError, Result};
pub use transport::{HttpTransport, SyncTransport};
