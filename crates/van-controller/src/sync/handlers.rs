//! Protocol handlers backed by the topology store
//!
//! Each handler runs one transaction. A claim counts against its invitation,
//! creates the member site and requests its `vanSite` certificate together,
//! so a claim that fails at any step leaves the invitation count unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use van_core::hashing::{hash_set, stale_objects};
use van_core::protocol::{Claim, ClaimReply, Get, Heartbeat, HeartbeatAck, ObjectReply};
use van_core::{
    CertificateSubject, MemberSite, NewCertificateRequest, ObjectHashes, ProtocolError,
};

use super::{SiteSyncHandler, SyncError};
use crate::provisioning::{access_links, lookup_certificate, site_objects, SubjectSecret};
use crate::secrets::SecretStore;
use crate::storage::{finish, StoreTransaction, TopologyStore};

/// Answers site messages from the topology store
#[derive(Debug, Clone)]
pub struct ControllerSync {
    store: Arc<dyn TopologyStore>,
    secrets: Arc<dyn SecretStore>,
}

impl ControllerSync {
    pub fn new(store: Arc<dyn TopologyStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { store, secrets }
    }

    pub async fn heartbeat(&self, message: Heartbeat, now: DateTime<Utc>) -> Result<HeartbeatAck, SyncError> {
        let mut tx = self.store.begin().await?;
        let result = self.authoritative_hashes(tx.as_mut(), &message, now).await;
        let authoritative = finish(tx, result).await?;

        let stale = stale_objects(&message.hashset, &authoritative);
        if !stale.is_empty() {
            debug!(site = %message.site, stale = ?stale, "Site holds stale objects");
        }
        Ok(HeartbeatAck {
            hashset: Some(authoritative),
        })
    }

    async fn authoritative_hashes(
        &self,
        tx: &mut dyn StoreTransaction,
        message: &Heartbeat,
        now: DateTime<Utc>,
    ) -> Result<ObjectHashes, SyncError> {
        if !tx
            .record_heartbeat(message.site, now, message.address.as_deref())
            .await?
        {
            return Err(SyncError::UnknownSite(message.site));
        }
        let site = tx
            .get_member_site(message.site)
            .await?
            .ok_or(SyncError::UnknownSite(message.site))?;
        let objects = site_objects(tx, self.secrets.as_ref(), &site).await?;
        Ok(hash_set(&objects))
    }

    pub async fn get(&self, message: Get) -> Result<ObjectReply, SyncError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let site = tx
                .get_member_site(message.site)
                .await?
                .ok_or(SyncError::UnknownSite(message.site))?;
            let objects = site_objects(tx.as_mut(), self.secrets.as_ref(), &site).await?;
            objects
                .into_iter()
                .find(|o| o.name == message.objectname)
                .ok_or_else(|| SyncError::UnknownObject(message.objectname.clone()))
        }
        .await;
        let object = finish(tx, result).await?;

        Ok(ObjectReply {
            object_name: object.name,
            hash: object.hash,
            data: object.data,
        })
    }

    pub async fn claim(&self, message: Claim, now: DateTime<Utc>) -> Result<ClaimReply, SyncError> {
        if message.name.trim().is_empty() {
            return Err(ProtocolError::Malformed("site name must not be empty".into()).into());
        }

        let mut tx = self.store.begin().await?;
        let result = self.admit(tx.as_mut(), &message, now).await;
        let reply = finish(tx, result).await?;

        info!(
            invitation = %message.claim,
            site = %reply.site,
            name = %message.name,
            "Admitted member site"
        );
        Ok(reply)
    }

    async fn admit(
        &self,
        tx: &mut dyn StoreTransaction,
        message: &Claim,
        now: DateTime<Utc>,
    ) -> Result<ClaimReply, SyncError> {
        let mut invitation = tx
            .get_invitation(message.claim)
            .await?
            .ok_or(SyncError::UnknownInvitation(message.claim))?;

        let count = invitation
            .record_claim(now)
            .map_err(|reason| SyncError::Admission {
                invitation: invitation.id,
                reason,
            })?;
        tx.update_invitation_count(invitation.id, count).await?;

        let site = MemberSite::from_claim(Uuid::new_v4(), message.name.clone(), &invitation, now);
        tx.insert_member_site(&site).await?;

        let claim_certificate = lookup_certificate(tx, CertificateSubject::Invitation(invitation.id)).await?;
        tx.insert_certificate_request(
            &NewCertificateRequest::new(CertificateSubject::MemberSite(site.id), now)
                .expiring(claim_certificate.expiration),
        )
        .await?;

        let outgoing_links = access_links(tx, &invitation.access_points()).await?;
        let secret = self.secrets.load_secret(&claim_certificate.object_name).await?;
        let credential = SubjectSecret {
            certificate: claim_certificate,
            secret,
        };

        Ok(ClaimReply {
            site: site.id,
            outgoing_links,
            site_client: credential.site_client(),
        })
    }
}

#[async_trait]
impl SiteSyncHandler for ControllerSync {
    async fn on_heartbeat(&self, message: Heartbeat) -> Result<HeartbeatAck, SyncError> {
        self.heartbeat(message, Utc::now()).await
    }

    async fn on_get(&self, message: Get) -> Result<ObjectReply, SyncError> {
        self.get(message).await
    }

    async fn on_claim(&self, message: Claim) -> Result<ClaimReply, SyncError> {
        self.claim(message, Utc::now()).await
    }
}
