use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use van_core::protocol::{Claim, ClaimReply, Get, Heartbeat, HeartbeatAck, ObjectReply};
use van_core::{ProtocolError, SiteMessage, SiteResponse};

use super::SyncError;

/// One handler per protocol operation
#[async_trait]
pub trait SiteSyncHandler: Send + Sync {
    async fn on_heartbeat(&self, message: Heartbeat) -> Result<HeartbeatAck, SyncError>;

    async fn on_get(&self, message: Get) -> Result<ObjectReply, SyncError>;

    async fn on_claim(&self, message: Claim) -> Result<ClaimReply, SyncError>;
}

/// Decode `message` and route it to its handler
///
/// A message that fails decoding (wrong version, unknown op, bad fields)
/// never reaches a handler.
pub async fn dispatch<H>(handler: &H, message: &Value) -> SiteResponse
where
    H: SiteSyncHandler + ?Sized,
{
    match SiteMessage::decode(message) {
        Ok(decoded) => route(handler, decoded).await,
        Err(e) => rejected(e),
    }
}

/// Like `dispatch`, for a raw request body
pub async fn dispatch_bytes<H>(handler: &H, body: &[u8]) -> SiteResponse
where
    H: SiteSyncHandler + ?Sized,
{
    match SiteMessage::from_slice(body) {
        Ok(decoded) => route(handler, decoded).await,
        Err(e) => rejected(e),
    }
}

fn rejected(err: ProtocolError) -> SiteResponse {
    warn!(error = %err, "Rejected site message");
    err.into()
}

async fn route<H>(handler: &H, message: SiteMessage) -> SiteResponse
where
    H: SiteSyncHandler + ?Sized,
{
    let op = message.op();
    debug!(op = %op, "Dispatching site message");

    let result = match message {
        SiteMessage::Heartbeat(m) => handler.on_heartbeat(m).await.map(SiteResponse::Heartbeat),
        SiteMessage::Get(m) => handler.on_get(m).await.map(SiteResponse::Object),
        SiteMessage::Claim(m) => handler.on_claim(m).await.map(SiteResponse::Claim),
    };

    result.unwrap_or_else(|e| {
        if e.is_rejection() {
            warn!(op = %op, status = e.status_code(), error = %e, "Site request refused");
        } else {
            error!(op = %op, status = e.status_code(), error = %e, "Site request failed");
        }
        e.into()
    })
}
