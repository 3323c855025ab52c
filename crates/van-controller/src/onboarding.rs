//! Onboarding operations
//!
//! Each operation is one transaction that creates a topology row together
//! with the certificate request the new row needs. Requests expire with the
//! certificate authority that will sign them.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use van_core::topology::{BackboneGraph, NewInteriorSite};
use van_core::{
    ApplicationNetwork, Backbone, BackboneId, CertificateSubject, InterRouterLink, InteriorSite,
    InteriorSiteId, Lifetime, MemberInvitation, NetworkId, NewCertificateRequest, NewInvitation,
    NewNetwork, TlsCertificate, VanError,
};

use crate::issuer::{CertificateIssuer, IssueRequest, IssuerError};
use crate::storage::{finish, StorageError, StoreTransaction, TopologyStore};

/// Error type for onboarding operations
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Network {0} is not ready")]
    NetworkNotReady(NetworkId),

    #[error(transparent)]
    Topology(#[from] VanError),

    #[error(transparent)]
    Issuer(#[from] IssuerError),
}

/// Create a network in status `new`
///
/// The validity window is checked first; a rejected window stores nothing.
pub async fn create_network(
    store: &dyn TopologyStore,
    input: NewNetwork,
) -> Result<ApplicationNetwork, OnboardingError> {
    input.validate()?;
    let network = input.into_network(Uuid::new_v4());
    let mut tx = store.begin().await?;
    let result = tx.insert_network(&network).await.map_err(OnboardingError::from);
    finish(tx, result).await?;

    info!(network = %network.id, name = %network.name, "Created network");
    Ok(network)
}

/// Ensure the backbone `name` exists and holds an interior CA
///
/// Creates the backbone when missing and issues a self-signed interior CA
/// when the backbone has none. Safe to call on every start-up.
pub async fn bootstrap_backbone(
    store: &dyn TopologyStore,
    issuer: Arc<dyn CertificateIssuer>,
    name: &str,
    lifetime: Lifetime,
    now: DateTime<Utc>,
) -> Result<Backbone, OnboardingError> {
    let mut tx = store.begin().await?;
    let result = ensure_backbone(tx.as_mut(), issuer.as_ref(), name, lifetime, now).await;
    finish(tx, result).await
}

async fn ensure_backbone(
    tx: &mut dyn StoreTransaction,
    issuer: &dyn CertificateIssuer,
    name: &str,
    lifetime: Lifetime,
    now: DateTime<Utc>,
) -> Result<Backbone, OnboardingError> {
    let mut backbone = match tx.find_backbone(name).await? {
        Some(existing) => existing,
        None => {
            let backbone = Backbone {
                id: Uuid::new_v4(),
                name: name.to_string(),
                certificate: None,
                federated_with: Vec::new(),
            };
            tx.insert_backbone(&backbone).await?;
            info!(backbone = %backbone.id, name = %name, "Created backbone");
            backbone
        }
    };

    if backbone.certificate.is_none() {
        let certificate = issuer
            .issue(IssueRequest {
                subject: format!("backbone:{}", backbone.id),
                is_ca: true,
                is_network_root: false,
                not_before: now,
                not_after: lifetime.after(now),
                issuer: None,
            })
            .await?;
        tx.insert_certificate(&certificate).await?;
        tx.set_backbone_certificate(backbone.id, certificate.id).await?;
        backbone.certificate = Some(certificate.id);
        info!(backbone = %backbone.id, certificate = %certificate.id, "Issued backbone interior CA");
    }

    Ok(backbone)
}

/// Add an interior site to a backbone and request its router certificate
pub async fn add_interior_site(
    store: &dyn TopologyStore,
    backbone: BackboneId,
    input: NewInteriorSite,
    now: DateTime<Utc>,
) -> Result<InteriorSite, OnboardingError> {
    let mut tx = store.begin().await?;
    let result = async {
        let row = tx
            .get_backbone(backbone)
            .await?
            .ok_or_else(|| StorageError::not_found("backbone", backbone))?;

        let site = InteriorSite {
            id: Uuid::new_v4(),
            name: input.name,
            backbone,
            certificate: None,
            host: input.host,
            inter_router_port: input.inter_router_port,
            member_port: input.member_port,
        };
        tx.insert_interior_site(&site).await?;

        let mut request = NewCertificateRequest::new(CertificateSubject::InteriorRouter(site.id), now);
        if let Some(ca) = certificate(tx.as_mut(), row.certificate).await? {
            request = request.expiring(ca.expiration);
        }
        tx.insert_certificate_request(&request).await?;
        Ok::<_, OnboardingError>(site)
    }
    .await;
    let site = finish(tx, result).await?;

    info!(site = %site.id, backbone = %backbone, host = %site.host, "Added interior site");
    Ok(site)
}

/// Add a link after checking both ends exist on federatable backbones
pub async fn add_link(
    store: &dyn TopologyStore,
    listening_site: InteriorSiteId,
    connecting_site: InteriorSiteId,
    cost: u32,
) -> Result<InterRouterLink, OnboardingError> {
    let link = InterRouterLink {
        id: Uuid::new_v4(),
        listening_site,
        connecting_site,
        cost,
    };

    let mut tx = store.begin().await?;
    let result = async {
        let graph = BackboneGraph::new(tx.list_backbones().await?, tx.list_interior_sites().await?);
        graph.check_link(&link)?;
        tx.insert_link(&link).await?;
        Ok::<_, OnboardingError>(())
    }
    .await;
    finish(tx, result).await?;

    info!(link = %link.id, from = %connecting_site, to = %listening_site, cost, "Added link");
    Ok(link)
}

/// Create an invitation on a ready network and request its claim certificate
pub async fn create_invitation(
    store: &dyn TopologyStore,
    network: NetworkId,
    input: NewInvitation,
    now: DateTime<Utc>,
) -> Result<MemberInvitation, OnboardingError> {
    let mut tx = store.begin().await?;
    let result = async {
        let row = tx
            .get_network(network)
            .await?
            .ok_or_else(|| StorageError::not_found("network", network))?;
        if !row.is_ready() {
            return Err(OnboardingError::NetworkNotReady(network));
        }

        let invitation = input.into_invitation(Uuid::new_v4(), network);
        for access in invitation.access_points() {
            if tx.get_interior_site(access).await?.is_none() {
                return Err(StorageError::foreign_key("interior site", access).into());
            }
        }
        tx.insert_invitation(&invitation).await?;

        let mut request = NewCertificateRequest::new(CertificateSubject::Invitation(invitation.id), now);
        if let Some(ca) = certificate(tx.as_mut(), row.certificate).await? {
            request = request.expiring(ca.expiration);
        }
        tx.insert_certificate_request(&request).await?;
        Ok::<_, OnboardingError>(invitation)
    }
    .await;
    let invitation = finish(tx, result).await?;

    info!(
        invitation = %invitation.id,
        network = %network,
        limit = ?invitation.instance_limit,
        "Created invitation"
    );
    Ok(invitation)
}

async fn certificate(
    tx: &mut dyn StoreTransaction,
    id: Option<van_core::CertificateId>,
) -> Result<Option<TlsCertificate>, StorageError> {
    match id {
        Some(id) => tx.get_certificate(id).await,
        None => Ok(None),
    }
}
