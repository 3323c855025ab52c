//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::onboarding::OnboardingError;
use crate::provisioning::ProvisioningError;
use crate::storage::StorageError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Certificate not issued: {0}")]
    NotIssued(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::NotIssued(msg) => (StatusCode::NOT_FOUND, "NOT_ISSUED", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::AlreadyExists(msg) => ApiError::Conflict(msg),
            StorageError::ForeignKey(msg) => ApiError::BadRequest(format!("Unknown reference: {}", msg)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<OnboardingError> for ApiError {
    fn from(err: OnboardingError) -> Self {
        match err {
            OnboardingError::Storage(e) => e.into(),
            OnboardingError::NetworkNotReady(id) => {
                ApiError::Conflict(format!("Network {} has no certificate authority yet", id))
            }
            OnboardingError::Topology(e) => ApiError::BadRequest(e.to_string()),
            OnboardingError::Issuer(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ProvisioningError> for ApiError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::Storage(e) => e.into(),
            ProvisioningError::NotIssued(subject) => ApiError::NotIssued(subject.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<van_core::VanError> for ApiError {
    fn from(err: van_core::VanError) -> Self {
        match err {
            van_core::VanError::UnknownVariant { .. } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
