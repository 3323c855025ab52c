//! Provisioning read queries and per-site configuration objects
//!
//! The provisioning facade asks three questions of the topology: which
//! certificate secret backs a subject, what a network's van-id is, and which
//! outgoing links a backbone site has. Member sites additionally receive
//! four named configuration objects, compared by content hash during
//! heartbeats:
//!
//! - `links`: the member-facing listeners of the invitation's access points
//! - `services`: exposures of the network's deliverable service links
//! - `endpoints`: workload placed on the site directly or via its class
//! - `certificate`: the site's identity credential, `null` until issued

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use van_core::hashing::ConfigObject;
use van_core::protocol::SiteClient;
use van_core::service::{plan_exposures, Exposure, ServiceLinkId};
use van_core::topology::BackboneGraph;
use van_core::{
    CertificateSubject, InteriorSiteId, MemberSite, NetworkId, OutgoingLink, TlsCertificate,
    VanError,
};

use crate::secrets::{Secret, SecretError, SecretStore, CERTIFICATE_ANNOTATION};
use crate::storage::{finish, subject_certificate, StorageError, StoreTransaction, TopologyStore};

pub const LINKS_OBJECT: &str = "links";
pub const SERVICES_OBJECT: &str = "services";
pub const ENDPOINTS_OBJECT: &str = "endpoints";
pub const CERTIFICATE_OBJECT: &str = "certificate";

/// Error type for provisioning queries
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("No certificate has been issued for {0}")]
    NotIssued(CertificateSubject),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Core(#[from] VanError),
}

/// A subject's certificate with the secret holding its key material
#[derive(Debug, Clone)]
pub struct SubjectSecret {
    pub certificate: TlsCertificate,
    pub secret: Secret,
}

impl SubjectSecret {
    /// The credential handed to a site
    pub fn site_client(&self) -> SiteClient {
        SiteClient {
            object_name: self.certificate.object_name.clone(),
            key_material: BASE64.encode(&self.secret.key_material),
            annotations: self.secret.annotations.clone(),
        }
    }
}

/// Read queries over the topology store
#[derive(Debug, Clone)]
pub struct Provisioning {
    store: Arc<dyn TopologyStore>,
    secrets: Arc<dyn SecretStore>,
}

impl Provisioning {
    pub fn new(store: Arc<dyn TopologyStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { store, secrets }
    }

    /// The van-id of a network
    pub async fn van_id(&self, network: NetworkId) -> Result<String, ProvisioningError> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .get_network(network)
            .await
            .and_then(|n| n.ok_or_else(|| StorageError::not_found("network", network)))
            .map(|n| n.van_id)
            .map_err(ProvisioningError::from);
        finish(tx, result).await
    }

    /// The certificate and secret backing a subject
    pub async fn subject_secret(&self, subject: CertificateSubject) -> Result<SubjectSecret, ProvisioningError> {
        let mut tx = self.store.begin().await?;
        let result = lookup_certificate(tx.as_mut(), subject).await;
        let certificate = finish(tx, result).await?;
        let secret = self.secrets.load_secret(&certificate.object_name).await?;
        Ok(SubjectSecret { certificate, secret })
    }

    /// Outgoing links advertised to a backbone site
    pub async fn backbone_links(&self, site: InteriorSiteId) -> Result<Vec<OutgoingLink>, ProvisioningError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            if tx.get_interior_site(site).await?.is_none() {
                return Err(StorageError::not_found("interior site", site));
            }
            let graph = BackboneGraph::new(tx.list_backbones().await?, tx.list_interior_sites().await?);
            let links = tx.links_from(site).await?;
            Ok::<_, StorageError>(graph.advertised_links(site, &links))
        }
        .await
        .map_err(ProvisioningError::from);
        finish(tx, result).await
    }
}

/// The certificate attached to `subject`'s row
pub async fn lookup_certificate(
    tx: &mut dyn StoreTransaction,
    subject: CertificateSubject,
) -> Result<TlsCertificate, ProvisioningError> {
    let id = subject_certificate(tx, subject)
        .await?
        .ok_or(ProvisioningError::NotIssued(subject))?;
    tx.get_certificate(id)
        .await?
        .ok_or(ProvisioningError::NotIssued(subject))
}

#[derive(Serialize)]
struct ServiceExposure<'a> {
    link: ServiceLinkId,
    #[serde(flatten)]
    exposure: &'a Exposure,
}

/// Derive the configuration objects of a member site
pub async fn site_objects(
    tx: &mut dyn StoreTransaction,
    secrets: &dyn SecretStore,
    site: &MemberSite,
) -> Result<Vec<ConfigObject>, ProvisioningError> {
    Ok(vec![
        links_object(tx, site).await?,
        services_object(tx, site).await?,
        ConfigObject::from_serialize(ENDPOINTS_OBJECT, &tx.endpoints_for_site(site).await?)?,
        certificate_object(tx, secrets, site).await?,
    ])
}

async fn links_object(tx: &mut dyn StoreTransaction, site: &MemberSite) -> Result<ConfigObject, ProvisioningError> {
    let invitation = tx
        .get_invitation(site.invitation)
        .await?
        .ok_or_else(|| StorageError::not_found("invitation", site.invitation))?;
    let links = access_links(tx, &invitation.access_points()).await?;
    Ok(ConfigObject::from_serialize(LINKS_OBJECT, &links)?)
}

/// Member-facing links towards each access point, in preference order
pub async fn access_links(
    tx: &mut dyn StoreTransaction,
    access_points: &[InteriorSiteId],
) -> Result<Vec<OutgoingLink>, StorageError> {
    let mut links = Vec::with_capacity(access_points.len());
    for id in access_points {
        let access = tx
            .get_interior_site(*id)
            .await?
            .ok_or_else(|| StorageError::not_found("interior site", id))?;
        links.push(OutgoingLink::member_access(&access));
    }
    Ok(links)
}

async fn services_object(tx: &mut dyn StoreTransaction, site: &MemberSite) -> Result<ConfigObject, ProvisioningError> {
    let links = tx.service_links(site.network).await?;
    let offerings = tx.offered_services(site.network).await?;
    let (exposed, rejected) = plan_exposures(&links, &offerings);
    for rejection in &rejected {
        warn!(network = %site.network, reason = %rejection, "Service link not exposed");
    }

    let services: Vec<ServiceExposure<'_>> = exposed
        .iter()
        .map(|(link, exposure)| ServiceExposure { link: *link, exposure })
        .collect();
    Ok(ConfigObject::from_serialize(SERVICES_OBJECT, &services)?)
}

async fn certificate_object(
    tx: &mut dyn StoreTransaction,
    secrets: &dyn SecretStore,
    site: &MemberSite,
) -> Result<ConfigObject, ProvisioningError> {
    let data = match lookup_certificate(tx, CertificateSubject::MemberSite(site.id)).await {
        Ok(certificate) => {
            let secret = secrets.load_secret(&certificate.object_name).await?;
            json!({
                "id": certificate.id,
                "expiration": certificate.expiration,
                "certificate": secret.annotation(CERTIFICATE_ANNOTATION),
                "keyMaterial": BASE64.encode(&secret.key_material),
            })
        }
        Err(ProvisioningError::NotIssued(_)) => Value::Null,
        Err(e) => return Err(e),
    };
    Ok(ConfigObject::new(CERTIFICATE_OBJECT, data))
}
