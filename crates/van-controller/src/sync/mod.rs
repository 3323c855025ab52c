//! Site synchronization protocol, controller side
//!
//! `dispatch` decodes an envelope and routes it to exactly one handler;
//! `ControllerSync` answers heartbeats, object fetches and claims from the
//! topology store. Every failure ends as a failure response whose status
//! code is picked by `SyncError::status_code`.

pub mod dispatch;
pub mod handlers;

pub use dispatch::{dispatch, dispatch_bytes, SiteSyncHandler};
pub use handlers::ControllerSync;

use van_core::invitation::{AdmissionError, InvitationId, MemberSiteId};
use van_core::protocol::STATUS_BAD_REQUEST;
use van_core::{ProtocolError, SiteResponse, VanError};

use crate::provisioning::ProvisioningError;
use crate::secrets::SecretError;
use crate::storage::StorageError;

/// Error type for protocol handlers
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Unknown site {0}")]
    UnknownSite(MemberSiteId),

    #[error("Unknown object '{0}'")]
    UnknownObject(String),

    #[error("Unknown invitation {0}")]
    UnknownInvitation(InvitationId),

    #[error("Invitation {invitation}: {reason}")]
    Admission {
        invitation: InvitationId,
        reason: AdmissionError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Core(#[from] VanError),
}

impl SyncError {
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::Protocol(_) => STATUS_BAD_REQUEST,
            SyncError::UnknownSite(_) | SyncError::UnknownObject(_) | SyncError::UnknownInvitation(_) => 404,
            SyncError::Admission { reason, .. } => match reason {
                AdmissionError::LimitReached(_) => 409,
                AdmissionError::Expired(_) => 410,
                AdmissionError::NotReady => 503,
            },
            SyncError::Storage(_) | SyncError::Provisioning(_) | SyncError::Secret(_) | SyncError::Core(_) => 500,
        }
    }

    /// Failures the site caused, as opposed to controller faults
    pub fn is_rejection(&self) -> bool {
        self.status_code() < 500 || matches!(self, SyncError::Admission { .. })
    }
}

impl From<SyncError> for SiteResponse {
    fn from(err: SyncError) -> Self {
        SiteResponse::failure(err.status_code(), err.to_string())
    }
}
