//! Error types for the VAN domain model

use thiserror::Error;

/// Result type alias using VanError
pub type Result<T> = std::result::Result<T, VanError>;

/// Errors that can occur in the VAN domain model
#[derive(Error, Debug)]
pub enum VanError {
    /// A closed enumeration received a value outside its set
    #[error("Unknown {kind} value: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    /// A certificate request names no subject, or more than one
    #[error("Certificate request subject invalid: {0}")]
    InvalidSubject(String),

    /// Expiration would exceed the issuing certificate's expiration
    #[error("Expiration {requested} exceeds issuer expiration {issuer}")]
    ExpirationExceedsIssuer { requested: String, issuer: String },

    /// Signing chain violation (non-CA issuer, cycle)
    #[error("Signing chain violation: {0}")]
    SigningChain(String),

    /// Network validity window rejected
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Backbone graph integrity violation
    #[error("Topology violation: {0}")]
    Topology(String),

    /// Invitation admission rejected
    #[error("Admission rejected: {0}")]
    Admission(#[from] crate::invitation::AdmissionError),

    /// Service link cannot be exposed
    #[error("Service exposure rejected: {0}")]
    Exposure(#[from] crate::service::ExposureError),

    /// Synchronization protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// COSE encoding/decoding error
    #[error("COSE error: {0}")]
    CoseError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl VanError {
    /// Shorthand for an unrecognized enumeration value
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        VanError::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}

impl From<ed25519_dalek::SignatureError> for VanError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        VanError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for VanError {
    fn from(err: serde_json::Error) -> Self {
        VanError::SerializationError(err.to_string())
    }
}

impl From<coset::CoseError> for VanError {
    fn from(err: coset::CoseError) -> Self {
        VanError::CoseError(format!("{:?}", err))
    }
}
