//! Topology administration handlers
//!
//! Thin wrappers over the onboarding operations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use van_core::topology::{NewInteriorSite, DEFAULT_LINK_COST};
use van_core::{ApplicationNetwork, InterRouterLink, InteriorSite, MemberInvitation, NewInvitation, NewNetwork};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;
use crate::onboarding;

/// Request to add an inter-router link
#[derive(Debug, Deserialize)]
pub struct NewLinkRequest {
    pub listening_site: Uuid,
    pub connecting_site: Uuid,
    #[serde(default = "default_cost")]
    pub cost: u32,
}

fn default_cost() -> u32 {
    DEFAULT_LINK_COST
}

/// Create an application network
///
/// POST /v1/networks
pub async fn create_network(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewNetwork>,
) -> Result<(StatusCode, Json<ApplicationNetwork>), ApiError> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Network name cannot be empty".into()));
    }

    let network = onboarding::create_network(state.store.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(network)))
}

/// Add an interior site to a backbone
///
/// POST /v1/backbones/{id}/sites
pub async fn add_interior_site(
    State(state): State<Arc<AppState>>,
    Path(backbone): Path<Uuid>,
    Json(request): Json<NewInteriorSite>,
) -> Result<(StatusCode, Json<InteriorSite>), ApiError> {
    if request.host.trim().is_empty() {
        return Err(ApiError::BadRequest("Site host cannot be empty".into()));
    }

    let site = onboarding::add_interior_site(state.store.as_ref(), backbone, request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(site)))
}

/// Add an inter-router link
///
/// POST /v1/backbone/links
pub async fn add_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewLinkRequest>,
) -> Result<(StatusCode, Json<InterRouterLink>), ApiError> {
    let link = onboarding::add_link(
        state.store.as_ref(),
        request.listening_site,
        request.connecting_site,
        request.cost,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// Create a member invitation
///
/// POST /v1/networks/{id}/invitations
pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Path(network): Path<Uuid>,
    Json(request): Json<NewInvitation>,
) -> Result<(StatusCode, Json<MemberInvitation>), ApiError> {
    if request.instance_limit == Some(0) {
        return Err(ApiError::BadRequest("Instance limit must be at least 1".into()));
    }

    let invitation = onboarding::create_invitation(state.store.as_ref(), network, request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}
