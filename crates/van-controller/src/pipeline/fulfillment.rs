//! Certificate request fulfillment worker
//!
//! A pass runs in two transactions. The first claims the oldest eligible
//! request and commits the processing mark, so no other pass can take it.
//! The second resolves the issuing certificate, issues, inserts and attaches
//! the new certificate and deletes the request. If the second transaction
//! fails, the new certificate's key material is discarded and the claim is
//! released in a third transaction, so the request is retried after the
//! error backoff; a crash in between is covered by the processing lease.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use van_core::certificate::effective_expiration;
use van_core::{CertificateRequest, CertificateSubject, NetworkStatus, TlsCertificate};

use super::{PassOutcome, PipelineError, Worker};
use crate::config::CertificatePolicy;
use crate::issuer::{CertificateIssuer, IssueRequest};
use crate::storage::{finish, StorageError, StoreTransaction, TopologyStore};

#[derive(Debug)]
pub struct Fulfillment {
    store: Arc<dyn TopologyStore>,
    issuer: Arc<dyn CertificateIssuer>,
    policy: CertificatePolicy,
}

impl Fulfillment {
    pub fn new(
        store: Arc<dyn TopologyStore>,
        issuer: Arc<dyn CertificateIssuer>,
        policy: CertificatePolicy,
    ) -> Self {
        Self { store, issuer, policy }
    }

    /// Run one fulfillment pass as of `now`
    pub async fn pass(&self, now: DateTime<Utc>) -> Result<PassOutcome, PipelineError> {
        let Some(request) = self.claim(now).await? else {
            return Ok(PassOutcome::Idle);
        };

        match self.fulfill(&request, now).await {
            Ok(certificate) => {
                info!(
                    request = request.id,
                    subject = %request.subject,
                    certificate = %certificate.id,
                    expiration = %certificate.expiration,
                    "Fulfilled certificate request"
                );
                Ok(PassOutcome::Worked)
            }
            Err(e) => {
                self.release(&request).await;
                Err(PipelineError::Request(request.id, Box::new(e)))
            }
        }
    }

    /// Claim the next eligible request and commit the processing mark
    pub async fn claim(&self, now: DateTime<Utc>) -> Result<Option<CertificateRequest>, PipelineError> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .claim_next_request(now, self.policy.request_lease)
            .await
            .map_err(PipelineError::from);
        finish(tx, result).await
    }

    async fn release(&self, request: &CertificateRequest) {
        let released = async {
            let mut tx = self.store.begin().await?;
            let result = tx.release_request(request.id).await;
            finish::<(), StorageError>(tx, result).await
        };
        if let Err(e) = released.await {
            warn!(
                request = request.id,
                error = %e,
                "Could not release claim; it stays held until the lease expires"
            );
        }
    }

    /// Issue the certificate for a claimed request and record it
    ///
    /// Key material of a certificate whose rows do not commit is discarded.
    async fn fulfill(
        &self,
        request: &CertificateRequest,
        now: DateTime<Utc>,
    ) -> Result<TlsCertificate, PipelineError> {
        let mut tx = self.store.begin().await?;
        let certificate = match self.issue(tx.as_mut(), request, now).await {
            Ok(certificate) => certificate,
            Err(e) => return finish(tx, Err(e)).await,
        };

        let result = self.record(tx.as_mut(), request, &certificate).await;
        if let Err(e) = finish(tx, result).await {
            if let Err(discard) = self.issuer.discard(&certificate).await {
                warn!(
                    certificate = %certificate.id,
                    error = %discard,
                    "Could not discard key material of unrecorded certificate"
                );
            }
            return Err(e);
        }
        Ok(certificate)
    }

    async fn issue(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &CertificateRequest,
        now: DateTime<Utc>,
    ) -> Result<TlsCertificate, PipelineError> {
        let issuer = self.issuing_certificate(tx, request.subject).await?;
        let is_root = matches!(request.subject, CertificateSubject::Network(_));

        let default_lifetime = if is_root {
            self.policy.ca_lifetime
        } else {
            self.policy.leaf_lifetime
        };
        let expiration = effective_expiration(request.expire_time, now, default_lifetime, issuer.as_ref());

        Ok(self
            .issuer
            .issue(IssueRequest {
                subject: request.subject.to_string(),
                is_ca: request.kind().issues_ca(),
                is_network_root: is_root,
                not_before: now,
                not_after: expiration,
                issuer: issuer.as_ref(),
            })
            .await?)
    }

    /// Insert and attach `certificate`, then retire the request
    async fn record(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &CertificateRequest,
        certificate: &TlsCertificate,
    ) -> Result<(), PipelineError> {
        tx.insert_certificate(certificate).await?;
        tx.attach_certificate(request.subject, certificate.id).await?;
        if let CertificateSubject::Network(network) = request.subject {
            tx.set_network_status(network, NetworkStatus::Ready).await?;
        }
        tx.delete_certificate_request(request.id).await?;
        Ok(())
    }

    /// The certificate that signs for `subject`; `None` for a network root
    async fn issuing_certificate(
        &self,
        tx: &mut dyn StoreTransaction,
        subject: CertificateSubject,
    ) -> Result<Option<TlsCertificate>, PipelineError> {
        let issuer_id = match subject {
            CertificateSubject::Network(id) => {
                tx.get_network(id)
                    .await?
                    .ok_or(PipelineError::MissingSubject(subject))?;
                return Ok(None);
            }
            CertificateSubject::MemberSite(id) => {
                let site = tx
                    .get_member_site(id)
                    .await?
                    .ok_or(PipelineError::MissingSubject(subject))?;
                tx.get_network(site.network)
                    .await?
                    .and_then(|n| n.certificate)
            }
            CertificateSubject::Invitation(id) => {
                let invitation = tx
                    .get_invitation(id)
                    .await?
                    .ok_or(PipelineError::MissingSubject(subject))?;
                tx.get_network(invitation.network)
                    .await?
                    .and_then(|n| n.certificate)
            }
            CertificateSubject::InteriorRouter(id) => {
                let site = tx
                    .get_interior_site(id)
                    .await?
                    .ok_or(PipelineError::MissingSubject(subject))?;
                tx.get_backbone(site.backbone)
                    .await?
                    .and_then(|b| b.certificate)
            }
        };

        let issuer_id = issuer_id.ok_or(PipelineError::IssuerNotReady(subject))?;
        let issuer = tx
            .get_certificate(issuer_id)
            .await?
            .ok_or(PipelineError::IssuerNotReady(subject))?;
        Ok(Some(issuer))
    }
}

#[async_trait]
impl Worker for Fulfillment {
    fn name(&self) -> &'static str {
        "request-fulfillment"
    }

    async fn run_once(&self) -> Result<PassOutcome, PipelineError> {
        self.pass(Utc::now()).await
    }
}
