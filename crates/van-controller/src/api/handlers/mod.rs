//! API request handlers

pub mod admin;
pub mod provisioning;
pub mod sync;

pub use admin::{add_interior_site, add_link, create_invitation, create_network, NewLinkRequest};
pub use provisioning::{backbone_links, subject_secret, van_id, SubjectSecretResponse, VanIdResponse};
pub use sync::site_sync;

use std::sync::Arc;

use crate::pipeline::PipelineStats;
use crate::provisioning::Provisioning;
use crate::storage::TopologyStore;
use crate::sync::ControllerSync;

/// Application state shared across handlers
pub struct AppState {
    /// Topology store
    pub store: Arc<dyn TopologyStore>,
    /// Site synchronization protocol handlers
    pub sync: ControllerSync,
    /// Provisioning read queries
    pub provisioning: Provisioning,
    /// Pipeline worker counters
    pub stats: Arc<PipelineStats>,
}
