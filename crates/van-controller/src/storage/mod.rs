//! Topology store abstraction
//!
//! All controller state lives behind `TopologyStore`. Every unit of work
//! opens a `StoreTransaction`, performs its reads and writes through it, and
//! either commits or rolls back; nothing is visible to other transactions
//! until commit. Two backends are provided:
//!
//! - `MemoryStore` (default): single-process, transactions are serialized
//! - `PostgresStore` (`postgres` feature): row locks with `FOR UPDATE SKIP LOCKED`
//!
//! The store enforces references between rows. Rules the schema cannot
//! express (subject/kind agreement, link federation, invitation admission)
//! are enforced by the callers.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt::{Debug, Display};
use tracing::warn;

use van_core::certificate::{CertificateId, RequestId};
use van_core::invitation::{InvitationId, MemberSiteId};
use van_core::network::NetworkId;
use van_core::service::{Endpoint, OfferedService, ServiceLink};
use van_core::topology::{BackboneId, InteriorSiteId};
use van_core::{
    ApplicationNetwork, Backbone, CertificateRequest, CertificateSubject, InterRouterLink,
    InteriorSite, MemberInvitation, MemberSite, NetworkStatus, NewCertificateRequest,
    TlsCertificate,
};

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Referenced row missing: {0}")]
    ForeignKey(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl StorageError {
    pub fn not_found(kind: &str, id: impl Display) -> Self {
        StorageError::NotFound(format!("{} {}", kind, id))
    }

    pub fn foreign_key(kind: &str, id: impl Display) -> Self {
        StorageError::ForeignKey(format!("{} {}", kind, id))
    }
}

impl From<van_core::VanError> for StorageError {
    fn from(err: van_core::VanError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Storage backend for the topology model
#[async_trait]
pub trait TopologyStore: Send + Sync + Debug {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StorageError>;

    /// Backend name for diagnostics
    fn backend(&self) -> &'static str;
}

/// One open transaction against the topology store
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    // =========================================================================
    // Application networks
    // =========================================================================

    async fn insert_network(&mut self, network: &ApplicationNetwork) -> Result<(), StorageError>;

    async fn get_network(&mut self, id: NetworkId) -> Result<Option<ApplicationNetwork>, StorageError>;

    /// Lock and return some network whose status is `new`
    async fn next_new_network(&mut self) -> Result<Option<ApplicationNetwork>, StorageError>;

    async fn set_network_status(&mut self, id: NetworkId, status: NetworkStatus) -> Result<(), StorageError>;

    // =========================================================================
    // Backbone
    // =========================================================================

    async fn insert_backbone(&mut self, backbone: &Backbone) -> Result<(), StorageError>;

    async fn get_backbone(&mut self, id: BackboneId) -> Result<Option<Backbone>, StorageError>;

    async fn find_backbone(&mut self, name: &str) -> Result<Option<Backbone>, StorageError>;

    async fn list_backbones(&mut self) -> Result<Vec<Backbone>, StorageError>;

    async fn insert_interior_site(&mut self, site: &InteriorSite) -> Result<(), StorageError>;

    async fn get_interior_site(&mut self, id: InteriorSiteId) -> Result<Option<InteriorSite>, StorageError>;

    async fn list_interior_sites(&mut self) -> Result<Vec<InteriorSite>, StorageError>;

    async fn insert_link(&mut self, link: &InterRouterLink) -> Result<(), StorageError>;

    /// Links whose connecting side is `site`
    async fn links_from(&mut self, site: InteriorSiteId) -> Result<Vec<InterRouterLink>, StorageError>;

    // =========================================================================
    // Invitations and member sites
    // =========================================================================

    async fn insert_invitation(&mut self, invitation: &MemberInvitation) -> Result<(), StorageError>;

    /// Read an invitation, locking it for the rest of the transaction
    async fn get_invitation(&mut self, id: InvitationId) -> Result<Option<MemberInvitation>, StorageError>;

    async fn update_invitation_count(&mut self, id: InvitationId, count: u32) -> Result<(), StorageError>;

    async fn insert_member_site(&mut self, site: &MemberSite) -> Result<(), StorageError>;

    async fn get_member_site(&mut self, id: MemberSiteId) -> Result<Option<MemberSite>, StorageError>;

    /// Record a heartbeat; returns false when the site does not exist
    async fn record_heartbeat(
        &mut self,
        id: MemberSiteId,
        at: DateTime<Utc>,
        address: Option<&str>,
    ) -> Result<bool, StorageError>;

    // =========================================================================
    // Services and endpoints
    // =========================================================================

    async fn insert_endpoint(&mut self, endpoint: &Endpoint) -> Result<(), StorageError>;

    /// Endpoints placed on `site`, either directly or through its site class
    async fn endpoints_for_site(&mut self, site: &MemberSite) -> Result<Vec<Endpoint>, StorageError>;

    async fn insert_service_link(&mut self, link: &ServiceLink) -> Result<(), StorageError>;

    async fn service_links(&mut self, network: NetworkId) -> Result<Vec<ServiceLink>, StorageError>;

    async fn insert_offered_service(
        &mut self,
        network: NetworkId,
        offered: &OfferedService,
    ) -> Result<(), StorageError>;

    async fn offered_services(&mut self, network: NetworkId) -> Result<Vec<OfferedService>, StorageError>;

    // =========================================================================
    // Certificates
    // =========================================================================

    async fn insert_certificate(&mut self, certificate: &TlsCertificate) -> Result<(), StorageError>;

    async fn get_certificate(&mut self, id: CertificateId) -> Result<Option<TlsCertificate>, StorageError>;

    /// Point the subject's row at `certificate`
    async fn attach_certificate(
        &mut self,
        subject: CertificateSubject,
        certificate: CertificateId,
    ) -> Result<(), StorageError>;

    async fn set_backbone_certificate(
        &mut self,
        backbone: BackboneId,
        certificate: CertificateId,
    ) -> Result<(), StorageError>;

    // =========================================================================
    // Certificate requests
    // =========================================================================

    async fn insert_certificate_request(
        &mut self,
        request: &NewCertificateRequest,
    ) -> Result<RequestId, StorageError>;

    async fn get_certificate_request(&mut self, id: RequestId) -> Result<Option<CertificateRequest>, StorageError>;

    async fn list_certificate_requests(&mut self) -> Result<Vec<CertificateRequest>, StorageError>;

    /// Claim the oldest eligible request
    ///
    /// Eligible means `request_time <= now` (or unset) and either not
    /// processing or processing since more than `lease` ago. The claimed row
    /// is marked processing as of `now`. Ordered by creation time, then id.
    async fn claim_next_request(
        &mut self,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<CertificateRequest>, StorageError>;

    /// Clear the processing flag of a request
    async fn release_request(&mut self, id: RequestId) -> Result<(), StorageError>;

    async fn delete_certificate_request(&mut self, id: RequestId) -> Result<(), StorageError>;

    // =========================================================================
    // Completion
    // =========================================================================

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Commit `tx` if `result` is Ok, roll it back otherwise
///
/// A failed rollback is logged; the original error is returned.
pub async fn finish<T, E>(tx: Box<dyn StoreTransaction>, result: Result<T, E>) -> Result<T, E>
where
    E: From<StorageError> + Display,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %err, rollback_error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Certificate currently attached to `subject`'s row
pub async fn subject_certificate(
    tx: &mut dyn StoreTransaction,
    subject: CertificateSubject,
) -> Result<Option<CertificateId>, StorageError> {
    let missing = || StorageError::not_found(subject.kind().as_str(), subject.id());
    let certificate = match subject {
        CertificateSubject::InteriorRouter(id) => tx.get_interior_site(id).await?.ok_or_else(missing)?.certificate,
        CertificateSubject::Network(id) => tx.get_network(id).await?.ok_or_else(missing)?.certificate,
        CertificateSubject::Invitation(id) => tx.get_invitation(id).await?.ok_or_else(missing)?.claim_certificate,
        CertificateSubject::MemberSite(id) => tx.get_member_site(id).await?.ok_or_else(missing)?.certificate,
    };
    Ok(certificate)
}

/// Object name under which a certificate's key material is stored
pub fn secret_name(certificate: CertificateId) -> String {
    format!("cert-{}", certificate.simple())
}
