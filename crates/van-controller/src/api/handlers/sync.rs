//! Site synchronization transport
//!
//! Sites post one protocol message per request. The HTTP status is always
//! 200; the protocol status travels in the body.

use axum::{body::Bytes, extract::State, Json};
use std::sync::Arc;

use van_core::SiteResponse;

use crate::api::handlers::AppState;
use crate::sync::dispatch_bytes;

/// Handle one site message
///
/// POST /v1/sync
pub async fn site_sync(State(state): State<Arc<AppState>>, body: Bytes) -> Json<SiteResponse> {
    Json(dispatch_bytes(&state.sync, &body).await)
}
