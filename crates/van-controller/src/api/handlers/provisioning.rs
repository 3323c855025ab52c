//! Provisioning read handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use van_core::protocol::SiteClient;
use van_core::{CertificateRequestType, CertificateSubject, OutgoingLink, TlsCertificate};

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct VanIdResponse {
    pub network: Uuid,
    pub van_id: String,
}

/// Certificate and key material backing a subject
#[derive(Debug, Serialize)]
pub struct SubjectSecretResponse {
    pub certificate: TlsCertificate,
    pub secret: SiteClient,
}

/// Get a network's van-id
///
/// GET /v1/networks/{id}/van-id
pub async fn van_id(
    State(state): State<Arc<AppState>>,
    Path(network): Path<Uuid>,
) -> Result<Json<VanIdResponse>, ApiError> {
    let van_id = state.provisioning.van_id(network).await?;
    Ok(Json(VanIdResponse { network, van_id }))
}

/// Get the certificate secret backing a subject
///
/// GET /v1/subjects/{kind}/{id}/secret
///
/// `kind` is a certificate request type (`vanCA`, `vanSite`, `memberClaim`,
/// `interiorRouter`).
pub async fn subject_secret(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<SubjectSecretResponse>, ApiError> {
    let kind: CertificateRequestType = kind.parse()?;
    let found = state
        .provisioning
        .subject_secret(CertificateSubject::from_kind(kind, id))
        .await?;

    Ok(Json(SubjectSecretResponse {
        secret: found.site_client(),
        certificate: found.certificate,
    }))
}

/// List the outgoing links of a backbone site
///
/// GET /v1/backbone/sites/{id}/links
pub async fn backbone_links(
    State(state): State<Arc<AppState>>,
    Path(site): Path<Uuid>,
) -> Result<Json<Vec<OutgoingLink>>, ApiError> {
    Ok(Json(state.provisioning.backbone_links(site).await?))
}
