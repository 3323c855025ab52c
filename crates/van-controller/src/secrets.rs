//! Secret store capability
//!
//! Key material produced by the certificate issuer is kept outside the
//! topology store, addressed by the certificate's `object_name`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use tokio::sync::RwLock;
use tracing::debug;

/// Annotation holding the base64 COSE certificate
pub const CERTIFICATE_ANNOTATION: &str = "certificate";

/// Annotation holding the certificate subject
pub const SUBJECT_ANNOTATION: &str = "subject";

/// Annotation holding the certificate expiration (RFC 3339)
pub const EXPIRATION_ANNOTATION: &str = "expiration";

/// Error type for secret store operations
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret backend error: {0}")]
    Backend(String),
}

/// Key material plus descriptive annotations
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub key_material: Vec<u8>,
    pub annotations: BTreeMap<String, String>,
}

impl Secret {
    pub fn new(key_material: Vec<u8>) -> Self {
        Self {
            key_material,
            annotations: BTreeMap::new(),
        }
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("key_material", &"[redacted]")
            .field("annotations", &self.annotations)
            .finish()
    }
}

/// Storage for certificate key material
#[async_trait]
pub trait SecretStore: Send + Sync + Debug {
    async fn load_secret(&self, name: &str) -> Result<Secret, SecretError>;

    async fn store_secret(&self, name: &str, secret: Secret) -> Result<(), SecretError>;

    /// Remove a secret; removing a missing secret is not an error
    async fn delete_secret(&self, name: &str) -> Result<(), SecretError>;
}

/// In-memory secret store
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, Secret>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn load_secret(&self, name: &str) -> Result<Secret, SecretError> {
        self.secrets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }

    async fn store_secret(&self, name: &str, secret: Secret) -> Result<(), SecretError> {
        debug!(name = %name, "Storing secret");
        self.secrets.write().await.insert(name.to_string(), secret);
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), SecretError> {
        if self.secrets.write().await.remove(name).is_some() {
            debug!(name = %name, "Deleted secret");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_load() {
        let store = MemorySecretStore::new();
        let secret = Secret::new(vec![1, 2, 3]).annotate(SUBJECT_ANNOTATION, "vanCA:x");

        store.store_secret("cert-1", secret.clone()).await.unwrap();
        let loaded = store.load_secret("cert-1").await.unwrap();

        assert_eq!(loaded, secret);
        assert_eq!(loaded.annotation(SUBJECT_ANNOTATION), Some("vanCA:x"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_secret() {
        let store = MemorySecretStore::new();
        store.store_secret("cert-1", Secret::new(vec![1])).await.unwrap();

        store.delete_secret("cert-1").await.unwrap();
        store.delete_secret("cert-1").await.unwrap();

        assert_eq!(store.len().await, 0);
        assert!(store.load_secret("cert-1").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let store = MemorySecretStore::new();
        assert!(matches!(
            store.load_secret("nope").await,
            Err(SecretError::NotFound(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let secret = Secret::new(vec![0xde, 0xad]);
        assert!(!format!("{:?}", secret).contains("222"));
        assert!(format!("{:?}", secret).contains("redacted"));
    }
}
