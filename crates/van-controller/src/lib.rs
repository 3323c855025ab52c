//! VAN Controller
//!
//! The control plane for multi-site virtual application networks:
//! - Runs the certificate authority pipeline (network intake and request
//!   fulfillment)
//! - Answers the site synchronization protocol (HB, GET, CLAIM)
//! - Serves provisioning reads and topology administration over HTTP
//!
//! ## Certificate hierarchy
//!
//! ```text
//! network CA (vanCA, self-signed)
//! ├── memberClaim   one per invitation, handed out by CLAIM
//! └── vanSite       one per member site
//!
//! backbone interior CA (self-signed, bootstrapped at start-up)
//! └── interiorRouter  one per interior site
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /ready` - Readiness check with pipeline counters
//! - `POST /v1/sync` - Site synchronization protocol message
//! - `GET /v1/networks/{id}/van-id` - Network van-id
//! - `GET /v1/subjects/{kind}/{id}/secret` - Certificate secret backing a subject
//! - `GET /v1/backbone/sites/{id}/links` - Outgoing links of a backbone site
//! - `POST /v1/networks` - Create a network
//! - `POST /v1/networks/{id}/invitations` - Create a member invitation
//! - `POST /v1/backbones/{id}/sites` - Add an interior site
//! - `POST /v1/backbone/links` - Add an inter-router link

pub mod api;
pub mod config;
pub mod issuer;
pub mod onboarding;
pub mod pipeline;
pub mod provisioning;
pub mod secrets;
pub mod storage;
pub mod sync;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{CertificatePolicy, ControllerConfig};
pub use issuer::{CertificateIssuer, LocalIssuer};
pub use pipeline::{Fulfillment, NetworkIntake, PipelineHandle, PipelineStats, Schedule};
pub use provisioning::Provisioning;
pub use secrets::{MemorySecretStore, SecretStore};
pub use storage::{MemoryStore, StoreTransaction, TopologyStore};
pub use sync::{dispatch, ControllerSync, SiteSyncHandler};
