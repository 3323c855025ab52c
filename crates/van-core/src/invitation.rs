//! Member invitations and the sites that accept them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::certificate::CertificateId;
use crate::network::NetworkId;
use crate::topology::InteriorSiteId;

pub type InvitationId = Uuid;
pub type MemberSiteId = Uuid;

/// Why an invitation refused a claim
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("invitation expired at {0}")]
    Expired(String),

    #[error("invitation instance limit of {0} reached")]
    LimitReached(u32),

    #[error("invitation claim certificate has not been issued")]
    NotReady,
}

/// A claim token that lets new member sites join a network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInvitation {
    pub id: InvitationId,

    /// Label given to the invitation
    pub name: String,

    pub network: NetworkId,

    /// Site class assigned to sites joining through this invitation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_class: Option<String>,

    /// Claims are refused after this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_deadline: Option<DateTime<Utc>>,

    /// Maximum number of successful claims (unlimited when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_limit: Option<u32>,

    /// Successful claims so far
    pub instance_count: u32,

    /// Backbone access point joining sites attach to
    pub primary_access: InteriorSiteId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_access: Option<InteriorSiteId>,

    /// `memberClaim` certificate handed to claimants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_certificate: Option<CertificateId>,
}

impl MemberInvitation {
    /// Check whether a claim at `now` would be admitted
    pub fn admit(&self, now: DateTime<Utc>) -> Result<(), AdmissionError> {
        if let Some(deadline) = self.join_deadline {
            if now > deadline {
                return Err(AdmissionError::Expired(deadline.to_rfc3339()));
            }
        }
        if let Some(limit) = self.instance_limit {
            if self.instance_count >= limit {
                return Err(AdmissionError::LimitReached(limit));
            }
        }
        if self.claim_certificate.is_none() {
            return Err(AdmissionError::NotReady);
        }
        Ok(())
    }

    /// Admit a claim and count it
    ///
    /// Returns the new instance count. The caller persists the updated
    /// invitation in the same transaction as the rest of the claim.
    pub fn record_claim(&mut self, now: DateTime<Utc>) -> Result<u32, AdmissionError> {
        self.admit(now)?;
        self.instance_count += 1;
        Ok(self.instance_count)
    }

    /// Access points in preference order
    pub fn access_points(&self) -> Vec<InteriorSiteId> {
        std::iter::once(self.primary_access)
            .chain(self.secondary_access)
            .collect()
    }
}

/// Input for creating an invitation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvitation {
    pub name: String,
    #[serde(default)]
    pub site_class: Option<String>,
    #[serde(default)]
    pub join_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub instance_limit: Option<u32>,
    pub primary_access: InteriorSiteId,
    #[serde(default)]
    pub secondary_access: Option<InteriorSiteId>,
}

impl NewInvitation {
    pub fn into_invitation(self, id: InvitationId, network: NetworkId) -> MemberInvitation {
        MemberInvitation {
            id,
            name: self.name,
            network,
            site_class: self.site_class,
            join_deadline: self.join_deadline,
            instance_limit: self.instance_limit,
            instance_count: 0,
            primary_access: self.primary_access,
            secondary_access: self.secondary_access,
            claim_certificate: None,
        }
    }
}

/// A site that joined a network by claiming an invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSite {
    pub id: MemberSiteId,
    pub name: String,
    pub network: NetworkId,
    pub invitation: InvitationId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_class: Option<String>,

    /// Backbone site this member is attached through
    pub active_access: InteriorSiteId,

    /// `vanSite` identity certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateId>,

    pub first_active_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Address reported in the last heartbeat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl MemberSite {
    /// The site created by a successful claim on `invitation`
    pub fn from_claim(
        id: MemberSiteId,
        name: impl Into<String>,
        invitation: &MemberInvitation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            network: invitation.network,
            invitation: invitation.id,
            site_class: invitation.site_class.clone(),
            active_access: invitation.primary_access,
            certificate: None,
            first_active_time: now,
            last_heartbeat: None,
            address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invitation(limit: Option<u32>, deadline: Option<DateTime<Utc>>) -> MemberInvitation {
        let mut inv = NewInvitation {
            name: "edge".into(),
            site_class: Some("edge".into()),
            join_deadline: deadline,
            instance_limit: limit,
            primary_access: Uuid::new_v4(),
            secondary_access: None,
        }
        .into_invitation(Uuid::new_v4(), Uuid::new_v4());
        inv.claim_certificate = Some(Uuid::new_v4());
        inv
    }

    #[test]
    fn test_claim_increments_count() {
        let now = Utc::now();
        let mut inv = invitation(Some(2), Some(now + Duration::hours(1)));

        assert_eq!(inv.record_claim(now).unwrap(), 1);
        assert_eq!(inv.record_claim(now).unwrap(), 2);
        assert_eq!(inv.record_claim(now), Err(AdmissionError::LimitReached(2)));
        assert_eq!(inv.instance_count, 2);
    }

    #[test]
    fn test_expired_invitation_rejected() {
        let now = Utc::now();
        let mut inv = invitation(Some(5), Some(now - Duration::seconds(1)));

        assert!(matches!(inv.record_claim(now), Err(AdmissionError::Expired(_))));
        assert_eq!(inv.instance_count, 0);
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let now = Utc::now();
        let inv = invitation(None, Some(now));
        assert!(inv.admit(now).is_ok());
    }

    #[test]
    fn test_unissued_claim_certificate_not_ready() {
        let now = Utc::now();
        let mut inv = invitation(None, None);
        inv.claim_certificate = None;
        assert_eq!(inv.admit(now), Err(AdmissionError::NotReady));
    }

    #[test]
    fn test_access_points_order() {
        let mut inv = invitation(None, None);
        let secondary = Uuid::new_v4();
        inv.secondary_access = Some(secondary);
        assert_eq!(inv.access_points(), vec![inv.primary_access, secondary]);
    }

    #[test]
    fn test_member_site_inherits_invitation() {
        let now = Utc::now();
        let inv = invitation(None, None);
        let site = MemberSite::from_claim(Uuid::new_v4(), "store-42", &inv, now);

        assert_eq!(site.network, inv.network);
        assert_eq!(site.invitation, inv.id);
        assert_eq!(site.site_class.as_deref(), Some("edge"));
        assert_eq!(site.active_access, inv.primary_access);
    }
}
