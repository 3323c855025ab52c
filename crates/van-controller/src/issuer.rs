//! Certificate issuer capability
//!
//! Given a subject, a validity window and an optional issuing certificate,
//! an issuer generates a key pair, signs a certificate for it and persists
//! the key material to the secret store under the new certificate's object
//! name. The returned `TlsCertificate` is ready to be inserted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use van_core::certificate::check_issuer;
use van_core::crypto::{CertificateBody, KeyPair, SignedCertificate};
use van_core::{TlsCertificate, VanError};

use crate::secrets::{
    Secret, SecretError, SecretStore, CERTIFICATE_ANNOTATION, EXPIRATION_ANNOTATION,
    SUBJECT_ANNOTATION,
};
use crate::storage::secret_name;

/// Error type for certificate issuance
#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    #[error("Issuer secret unavailable: {0}")]
    Secret(#[from] SecretError),

    #[error("Issuer secret {0} carries no certificate")]
    MissingCertificate(String),

    #[error(transparent)]
    Core(#[from] VanError),
}

/// What to issue
#[derive(Debug, Clone)]
pub struct IssueRequest<'a> {
    /// Display form of the subject, e.g. `vanSite:<uuid>`
    pub subject: String,

    pub is_ca: bool,

    /// Marks the root of a network's trust hierarchy
    pub is_network_root: bool,

    pub not_before: DateTime<Utc>,

    /// Requested expiration; clamped to the issuer's
    pub not_after: DateTime<Utc>,

    /// Signing certificate; `None` issues a self-signed certificate
    pub issuer: Option<&'a TlsCertificate>,
}

/// Produces signed certificates
#[async_trait]
pub trait CertificateIssuer: Send + Sync + Debug {
    async fn issue(&self, request: IssueRequest<'_>) -> Result<TlsCertificate, IssuerError>;

    /// Drop the key material of a certificate that was never recorded
    async fn discard(&self, certificate: &TlsCertificate) -> Result<(), IssuerError>;
}

/// Ed25519/COSE issuer keeping keys in a `SecretStore`
#[derive(Debug, Clone)]
pub struct LocalIssuer {
    secrets: Arc<dyn SecretStore>,
}

impl LocalIssuer {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Load the signing key of an issuing certificate
    async fn signing_key(&self, issuer: &TlsCertificate) -> Result<KeyPair, IssuerError> {
        let secret = self.secrets.load_secret(&issuer.object_name).await?;
        if secret.annotation(CERTIFICATE_ANNOTATION).is_none() {
            return Err(IssuerError::MissingCertificate(issuer.object_name.clone()));
        }
        Ok(KeyPair::from_key_material(
            issuer.id.to_string(),
            &secret.key_material,
        )?)
    }
}

#[async_trait]
impl CertificateIssuer for LocalIssuer {
    async fn issue(&self, request: IssueRequest<'_>) -> Result<TlsCertificate, IssuerError> {
        let id = Uuid::new_v4();
        let subject_key = KeyPair::generate(id.to_string());

        let (signer, issuer_serial, not_after) = match request.issuer {
            Some(issuer) => {
                let not_after = request.not_after.min(issuer.expiration);
                check_issuer(issuer, not_after)?;
                (self.signing_key(issuer).await?, issuer.id.to_string(), not_after)
            }
            None => (subject_key.clone(), id.to_string(), request.not_after),
        };

        let body = CertificateBody {
            serial: id.to_string(),
            subject: request.subject.clone(),
            issuer: issuer_serial,
            is_ca: request.is_ca,
            not_before: request.not_before,
            not_after,
            public_key: subject_key.public_key_base64(),
        };
        let signed = signer.sign_certificate(&body)?;

        let object_name = secret_name(id);
        let secret = Secret::new(subject_key.signing_key_bytes().to_vec())
            .annotate(CERTIFICATE_ANNOTATION, signed.to_base64()?)
            .annotate(SUBJECT_ANNOTATION, request.subject.clone())
            .annotate(EXPIRATION_ANNOTATION, not_after.to_rfc3339());
        self.secrets.store_secret(&object_name, secret).await?;

        info!(
            certificate = %id,
            subject = %request.subject,
            is_ca = request.is_ca,
            expiration = %not_after,
            "Issued certificate"
        );

        Ok(TlsCertificate {
            id,
            is_network_root: request.is_network_root,
            is_ca: request.is_ca,
            object_name,
            signed_by: request.issuer.map(|i| i.id),
            expiration: not_after,
        })
    }

    async fn discard(&self, certificate: &TlsCertificate) -> Result<(), IssuerError> {
        self.secrets.delete_secret(&certificate.object_name).await?;
        info!(certificate = %certificate.id, "Discarded unrecorded certificate");
        Ok(())
    }
}

/// Decode the signed certificate kept in a secret's annotations
pub fn signed_certificate(secret: &Secret) -> Result<SignedCertificate, IssuerError> {
    let encoded = secret
        .annotation(CERTIFICATE_ANNOTATION)
        .ok_or_else(|| IssuerError::MissingCertificate("secret".into()))?;
    Ok(SignedCertificate::from_base64(encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;
    use chrono::Duration;
    use van_core::crypto::PublicKey;

    fn issue_request(issuer: Option<&TlsCertificate>, days: i64) -> IssueRequest<'_> {
        let now = Utc::now();
        IssueRequest {
            subject: "vanSite:test".into(),
            is_ca: issuer.is_none(),
            is_network_root: issuer.is_none(),
            not_before: now,
            not_after: now + Duration::days(days),
            issuer,
        }
    }

    #[tokio::test]
    async fn test_self_signed_root() {
        let secrets = Arc::new(MemorySecretStore::new());
        let issuer = LocalIssuer::new(secrets.clone());

        let root = issuer.issue(issue_request(None, 365)).await.unwrap();
        assert!(root.is_self_signed());
        assert!(root.is_ca);

        let secret = secrets.load_secret(&root.object_name).await.unwrap();
        let signed = signed_certificate(&secret).unwrap();
        let body = signed.body().unwrap();
        assert!(body.is_self_signed());

        let key = PublicKey::from_base64(root.id.to_string(), &body.public_key).unwrap();
        assert!(key.verify_certificate(&signed).is_ok());
    }

    #[tokio::test]
    async fn test_leaf_signed_by_issuer_and_clamped() {
        let secrets = Arc::new(MemorySecretStore::new());
        let issuer = LocalIssuer::new(secrets.clone());

        let root = issuer.issue(issue_request(None, 30)).await.unwrap();
        let leaf = issuer.issue(issue_request(Some(&root), 365)).await.unwrap();

        assert_eq!(leaf.signed_by, Some(root.id));
        assert_eq!(leaf.expiration, root.expiration);
        assert!(!leaf.is_ca);

        // the leaf verifies under the root's public key
        let root_secret = secrets.load_secret(&root.object_name).await.unwrap();
        let root_body = signed_certificate(&root_secret).unwrap().body().unwrap();
        let root_key = PublicKey::from_base64(root.id.to_string(), &root_body.public_key).unwrap();

        let leaf_secret = secrets.load_secret(&leaf.object_name).await.unwrap();
        let leaf_signed = signed_certificate(&leaf_secret).unwrap();
        assert_eq!(root_key.verify_certificate(&leaf_signed).unwrap().issuer, root.id.to_string());
    }

    #[tokio::test]
    async fn test_discard_removes_key_material() {
        let secrets = Arc::new(MemorySecretStore::new());
        let issuer = LocalIssuer::new(secrets.clone());

        let root = issuer.issue(issue_request(None, 30)).await.unwrap();
        assert_eq!(secrets.len().await, 1);

        issuer.discard(&root).await.unwrap();
        assert_eq!(secrets.len().await, 0);
    }

    #[tokio::test]
    async fn test_non_ca_issuer_rejected() {
        let secrets = Arc::new(MemorySecretStore::new());
        let issuer = LocalIssuer::new(secrets);

        let root = issuer.issue(issue_request(None, 30)).await.unwrap();
        let leaf = issuer.issue(issue_request(Some(&root), 10)).await.unwrap();

        assert!(matches!(
            issuer.issue(issue_request(Some(&leaf), 5)).await,
            Err(IssuerError::Core(VanError::SigningChain(_)))
        ));
    }
}
