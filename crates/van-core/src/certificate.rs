//! Certificates, certificate requests and signing-chain rules
//!
//! A `TlsCertificate` is a node in a forest: roots are self-signed, every
//! other certificate points at its issuer through `signed_by`. The store only
//! enforces references, so the rules that keep the forest sound live here:
//!
//! - every issuer must itself be a CA
//! - the signing graph is acyclic
//! - no certificate outlives its issuer

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{Result, VanError};
use crate::invitation::{InvitationId, MemberSiteId};
use crate::network::{Lifetime, NetworkId};
use crate::topology::InteriorSiteId;
use crate::types::CertificateRequestType;

/// Certificate identifier
pub type CertificateId = Uuid;

/// Certificate request identifier (store sequence, ascending with creation)
pub type RequestId = i64;

/// A node in the certificate forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsCertificate {
    pub id: CertificateId,

    /// Root of a network's trust hierarchy
    pub is_network_root: bool,

    /// Whether this certificate may sign others
    pub is_ca: bool,

    /// Name of the secret holding the key material
    pub object_name: String,

    /// Issuer (absent for self-signed certificates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<CertificateId>,

    pub expiration: DateTime<Utc>,
}

impl TlsCertificate {
    pub fn is_self_signed(&self) -> bool {
        self.signed_by.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// The subject a certificate request is about
///
/// The request kind is derived from the variant, so a request can never name
/// a subject that does not match its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum CertificateSubject {
    #[serde(rename = "interiorRouter")]
    InteriorRouter(InteriorSiteId),
    #[serde(rename = "vanCA")]
    Network(NetworkId),
    #[serde(rename = "memberClaim")]
    Invitation(InvitationId),
    #[serde(rename = "vanSite")]
    MemberSite(MemberSiteId),
}

impl CertificateSubject {
    pub fn kind(&self) -> CertificateRequestType {
        match self {
            CertificateSubject::InteriorRouter(_) => CertificateRequestType::InteriorRouter,
            CertificateSubject::Network(_) => CertificateRequestType::VanCa,
            CertificateSubject::Invitation(_) => CertificateRequestType::MemberClaim,
            CertificateSubject::MemberSite(_) => CertificateRequestType::VanSite,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            CertificateSubject::InteriorRouter(id)
            | CertificateSubject::Network(id)
            | CertificateSubject::Invitation(id)
            | CertificateSubject::MemberSite(id) => *id,
        }
    }

    pub fn from_kind(kind: CertificateRequestType, id: Uuid) -> Self {
        match kind {
            CertificateRequestType::InteriorRouter => CertificateSubject::InteriorRouter(id),
            CertificateRequestType::VanCa => CertificateSubject::Network(id),
            CertificateRequestType::MemberClaim => CertificateSubject::Invitation(id),
            CertificateRequestType::VanSite => CertificateSubject::MemberSite(id),
        }
    }

    /// Rebuild a subject from the four nullable store columns
    ///
    /// Exactly one column must be populated, and it must be the one the
    /// request kind selects.
    pub fn from_columns(
        kind: CertificateRequestType,
        interior_router: Option<Uuid>,
        network: Option<Uuid>,
        invitation: Option<Uuid>,
        site: Option<Uuid>,
    ) -> Result<Self> {
        let populated = [interior_router, network, invitation, site]
            .iter()
            .filter(|c| c.is_some())
            .count();
        if populated != 1 {
            return Err(VanError::InvalidSubject(format!(
                "{} request has {} subject columns populated, expected 1",
                kind, populated
            )));
        }

        let selected = match kind {
            CertificateRequestType::InteriorRouter => interior_router,
            CertificateRequestType::VanCa => network,
            CertificateRequestType::MemberClaim => invitation,
            CertificateRequestType::VanSite => site,
        };

        selected
            .map(|id| Self::from_kind(kind, id))
            .ok_or_else(|| {
                VanError::InvalidSubject(format!(
                    "{} request populates the wrong subject column",
                    kind
                ))
            })
    }

    /// The four store columns for this subject, in
    /// (interior_router, network, invitation, site) order
    pub fn columns(&self) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        match *self {
            CertificateSubject::InteriorRouter(id) => (Some(id), None, None, None),
            CertificateSubject::Network(id) => (None, Some(id), None, None),
            CertificateSubject::Invitation(id) => (None, None, Some(id), None),
            CertificateSubject::MemberSite(id) => (None, None, None, Some(id)),
        }
    }
}

impl std::fmt::Display for CertificateSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A pending unit of work for the certificate pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub id: RequestId,

    pub subject: CertificateSubject,

    pub created_time: DateTime<Utc>,

    /// Not actionable before this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_time: Option<DateTime<Utc>>,

    /// Desired expiration of the resulting certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,

    /// Claimed by a fulfillment pass
    pub processing: bool,

    /// When the current claim was taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_since: Option<DateTime<Utc>>,
}

impl CertificateRequest {
    pub fn kind(&self) -> CertificateRequestType {
        self.subject.kind()
    }

    /// Whether a fulfillment pass at `now` may claim this request
    ///
    /// A request is eligible once its request time has passed and it is not
    /// held by a live claim. A claim older than `lease` is considered
    /// abandoned.
    pub fn is_eligible(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        let due = self.request_time.map_or(true, |t| t <= now);
        let free = !self.processing
            || self
                .processing_since
                .map_or(true, |since| since + lease <= now);
        due && free
    }
}

/// Input for inserting a certificate request
#[derive(Debug, Clone, PartialEq)]
pub struct NewCertificateRequest {
    pub subject: CertificateSubject,
    pub created_time: DateTime<Utc>,
    pub request_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
}

impl NewCertificateRequest {
    pub fn new(subject: CertificateSubject, now: DateTime<Utc>) -> Self {
        Self {
            subject,
            created_time: now,
            request_time: Some(now),
            expire_time: None,
        }
    }

    pub fn not_before(mut self, request_time: DateTime<Utc>) -> Self {
        self.request_time = Some(request_time);
        self
    }

    pub fn expiring(mut self, expire_time: DateTime<Utc>) -> Self {
        self.expire_time = Some(expire_time);
        self
    }
}

/// Pick the expiration for a certificate about to be issued
///
/// Uses the requested expiration, or `default_lifetime` after `now` when none
/// was requested, then clamps to the issuer's expiration.
pub fn effective_expiration(
    requested: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    default_lifetime: Lifetime,
    issuer: Option<&TlsCertificate>,
) -> DateTime<Utc> {
    let wanted = requested.unwrap_or_else(|| default_lifetime.after(now));
    match issuer {
        Some(issuer) if issuer.expiration < wanted => issuer.expiration,
        _ => wanted,
    }
}

/// Check that `issuer` may sign a certificate expiring at `expiration`
pub fn check_issuer(issuer: &TlsCertificate, expiration: DateTime<Utc>) -> Result<()> {
    if !issuer.is_ca {
        return Err(VanError::SigningChain(format!(
            "issuer {} is not a certificate authority",
            issuer.id
        )));
    }
    if expiration > issuer.expiration {
        return Err(VanError::ExpirationExceedsIssuer {
            requested: expiration.to_rfc3339(),
            issuer: issuer.expiration.to_rfc3339(),
        });
    }
    Ok(())
}

/// Walk the signing chain from `leaf` to its root
///
/// Returns the chain leaf-first. Fails on a dangling issuer, an issuer that
/// is not a CA, a certificate that outlives its issuer, or a cycle.
pub fn verify_signing_chain<F>(leaf: &TlsCertificate, lookup: F) -> Result<Vec<CertificateId>>
where
    F: Fn(CertificateId) -> Option<TlsCertificate>,
{
    let mut chain = vec![leaf.id];
    let mut seen: HashSet<CertificateId> = HashSet::from([leaf.id]);
    let mut current = leaf.clone();

    while let Some(issuer_id) = current.signed_by {
        if !seen.insert(issuer_id) {
            return Err(VanError::SigningChain(format!(
                "cycle through certificate {}",
                issuer_id
            )));
        }
        let issuer = lookup(issuer_id).ok_or_else(|| {
            VanError::SigningChain(format!("issuer {} does not exist", issuer_id))
        })?;
        check_issuer(&issuer, current.expiration)?;
        chain.push(issuer_id);
        current = issuer;
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cert(is_ca: bool, signed_by: Option<CertificateId>, expiration: DateTime<Utc>) -> TlsCertificate {
        TlsCertificate {
            id: Uuid::new_v4(),
            is_network_root: signed_by.is_none(),
            is_ca,
            object_name: "secret".into(),
            signed_by,
            expiration,
        }
    }

    #[test]
    fn test_subject_columns_roundtrip() {
        let id = Uuid::new_v4();
        for kind in [
            CertificateRequestType::InteriorRouter,
            CertificateRequestType::VanCa,
            CertificateRequestType::MemberClaim,
            CertificateRequestType::VanSite,
        ] {
            let subject = CertificateSubject::from_kind(kind, id);
            let (a, b, c, d) = subject.columns();
            assert_eq!(CertificateSubject::from_columns(kind, a, b, c, d).unwrap(), subject);
            assert_eq!(subject.kind(), kind);
        }
    }

    #[test]
    fn test_subject_column_mismatch_rejected() {
        let id = Some(Uuid::new_v4());

        // vanCA must populate the network column
        let err = CertificateSubject::from_columns(CertificateRequestType::VanCa, None, None, id, None);
        assert!(matches!(err, Err(VanError::InvalidSubject(_))));

        // two populated columns
        let err = CertificateSubject::from_columns(CertificateRequestType::VanSite, None, id, None, id);
        assert!(err.is_err());

        // none populated
        let err = CertificateSubject::from_columns(CertificateRequestType::VanSite, None, None, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn test_future_request_not_eligible() {
        let now = Utc::now();
        let request = CertificateRequest {
            id: 1,
            subject: CertificateSubject::Network(Uuid::new_v4()),
            created_time: now - Duration::hours(1),
            request_time: Some(now + Duration::minutes(5)),
            expire_time: None,
            processing: false,
            processing_since: None,
        };

        assert!(!request.is_eligible(now, Duration::minutes(5)));
        assert!(request.is_eligible(now + Duration::minutes(5), Duration::minutes(5)));
    }

    #[test]
    fn test_processing_lease() {
        let now = Utc::now();
        let mut request = CertificateRequest {
            id: 1,
            subject: CertificateSubject::Network(Uuid::new_v4()),
            created_time: now,
            request_time: None,
            expire_time: None,
            processing: true,
            processing_since: Some(now),
        };

        let lease = Duration::minutes(5);
        assert!(!request.is_eligible(now + Duration::minutes(4), lease));
        assert!(request.is_eligible(now + Duration::minutes(5), lease));

        request.processing = false;
        request.processing_since = None;
        assert!(request.is_eligible(now, lease));
    }

    #[test]
    fn test_effective_expiration_clamps_to_issuer() {
        let now = Utc::now();
        let issuer = cert(true, None, now + Duration::days(30));

        let requested = now + Duration::days(365);
        assert_eq!(
            effective_expiration(Some(requested), now, Lifetime::days(90), Some(&issuer)),
            issuer.expiration
        );

        let short = now + Duration::days(10);
        assert_eq!(
            effective_expiration(Some(short), now, Lifetime::days(90), Some(&issuer)),
            short
        );

        assert_eq!(
            effective_expiration(None, now, Lifetime::days(90), None),
            now + Duration::days(90)
        );
    }

    #[test]
    fn test_chain_verification() {
        let now = Utc::now();
        let root = cert(true, None, now + Duration::days(365));
        let intermediate = cert(true, Some(root.id), now + Duration::days(300));
        let leaf = cert(false, Some(intermediate.id), now + Duration::days(90));

        let all: HashMap<_, _> = [root.clone(), intermediate.clone(), leaf.clone()]
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let chain = verify_signing_chain(&leaf, |id| all.get(&id).cloned()).unwrap();
        assert_eq!(chain, vec![leaf.id, intermediate.id, root.id]);
    }

    #[test]
    fn test_chain_rejects_non_ca_issuer() {
        let now = Utc::now();
        let not_ca = cert(false, None, now + Duration::days(365));
        let leaf = cert(false, Some(not_ca.id), now + Duration::days(90));

        let lookup = |id| (id == not_ca.id).then(|| not_ca.clone());
        assert!(matches!(
            verify_signing_chain(&leaf, lookup),
            Err(VanError::SigningChain(_))
        ));
    }

    #[test]
    fn test_chain_rejects_outliving_issuer() {
        let now = Utc::now();
        let root = cert(true, None, now + Duration::days(30));
        let leaf = cert(false, Some(root.id), now + Duration::days(90));

        let lookup = |id| (id == root.id).then(|| root.clone());
        assert!(matches!(
            verify_signing_chain(&leaf, lookup),
            Err(VanError::ExpirationExceedsIssuer { .. })
        ));
    }

    #[test]
    fn test_chain_rejects_cycle() {
        let now = Utc::now();
        let mut a = cert(true, None, now + Duration::days(30));
        let b = cert(true, Some(a.id), now + Duration::days(30));
        a.signed_by = Some(b.id);

        let all: HashMap<_, _> = [a.clone(), b.clone()].into_iter().map(|c| (c.id, c)).collect();
        assert!(verify_signing_chain(&a, |id| all.get(&id).cloned()).is_err());
    }
}
