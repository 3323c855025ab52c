//! Certificate signing primitives
//!
//! A certificate is a COSE_Sign1 envelope, signed with Ed25519, over a JSON
//! `CertificateBody`. The key id in the protected header names the issuing
//! certificate, so a verifier can find the issuer's public key.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair for signing
//! - `PublicKey`: Ed25519 public key for verification
//! - `SignedCertificate`: COSE_Sign1 wrapped certificate body

use crate::error::{Result, VanError};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use coset::{iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// The signed content of a certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateBody {
    /// Serial number (the certificate id)
    pub serial: String,

    /// Subject the certificate identifies, e.g. `vanSite:<uuid>`
    pub subject: String,

    /// Serial of the issuing certificate (equal to `serial` when self-signed)
    pub issuer: String,

    pub is_ca: bool,

    pub not_before: DateTime<Utc>,

    pub not_after: DateTime<Utc>,

    /// Base64-encoded Ed25519 public key of the subject
    pub public_key: String,
}

impl CertificateBody {
    pub fn is_self_signed(&self) -> bool {
        self.serial == self.issuer
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(VanError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(VanError::from)
    }
}

/// A signed COSE_Sign1 structure
#[derive(Debug, Clone)]
pub struct CoseSigned<T> {
    cose: CoseSign1,
    _marker: std::marker::PhantomData<T>,
}

/// Signed certificate (COSE_Sign1 wrapped)
pub type SignedCertificate = CoseSigned<CertificateBody>;

impl<T> CoseSigned<T> {
    /// Get the key ID from the protected header
    pub fn kid(&self) -> Option<String> {
        let kid = &self.cose.protected.header.key_id;
        if kid.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(kid).to_string())
        }
    }

    /// Serialize to CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cose.clone().to_vec().map_err(VanError::from)
    }

    /// Deserialize from CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_slice(bytes).map_err(VanError::from)?;
        Ok(Self {
            cose,
            _marker: std::marker::PhantomData,
        })
    }

    /// Base64 of the CBOR encoding
    pub fn to_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_bytes()?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| VanError::CryptoError(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl SignedCertificate {
    /// Extract the body without checking the signature
    pub fn body(&self) -> Result<CertificateBody> {
        let payload = self
            .cose
            .payload
            .as_ref()
            .ok_or(VanError::MissingField("payload".into()))?;
        CertificateBody::from_bytes(payload)
    }
}

/// Ed25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    kid: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    /// Restore a key pair from stored key material
    pub fn from_key_material(kid: impl Into<String>, material: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = material
            .try_into()
            .map_err(|_| VanError::CryptoError("Invalid key length".into()))?;
        Ok(Self::from_bytes(kid, &bytes))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Raw signing key bytes, as persisted in the secret store
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Base64 of the public key, as carried in `CertificateBody::public_key`
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.to_bytes())
    }

    /// Sign a certificate body and wrap in COSE_Sign1
    pub fn sign_certificate(&self, body: &CertificateBody) -> Result<SignedCertificate> {
        let payload = body.to_bytes()?;
        let cose = self.sign_cose(&payload)?;
        Ok(CoseSigned {
            cose,
            _marker: std::marker::PhantomData,
        })
    }

    fn sign_cose(&self, payload: &[u8]) -> Result<CoseSign1> {
        let protected = HeaderBuilder::new()
            .algorithm(EDDSA_ALG)
            .key_id(self.kid.as_bytes().to_vec())
            .build();

        let signed = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload.to_vec())
            .try_create_signature(&[], |data| {
                let signature = self.signing_key.sign(data);
                Ok::<_, VanError>(signature.to_bytes().to_vec())
            })?;

        Ok(signed.build())
    }
}

/// Ed25519 public key for verification
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kid", &self.kid).finish()
    }
}

impl PublicKey {
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    /// Decode the base64 form carried in a certificate body
    pub fn from_base64(kid: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| VanError::CryptoError(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VanError::CryptoError("Invalid key length".into()))?;
        Self::from_bytes(kid, &bytes)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Verify a signed certificate and extract its body
    pub fn verify_certificate(&self, signed: &SignedCertificate) -> Result<CertificateBody> {
        self.verify_cose(&signed.cose)?;
        signed.body()
    }

    fn verify_cose(&self, cose: &CoseSign1) -> Result<()> {
        let kid = &cose.protected.header.key_id;
        if !kid.is_empty() {
            let kid_str = String::from_utf8_lossy(kid);
            if kid_str != self.kid {
                return Err(VanError::CryptoError(format!(
                    "Key ID mismatch: expected '{}', got '{}'",
                    self.kid, kid_str
                )));
            }
        }

        let sig_structure = cose.tbs_data(&[]);
        let signature_bytes: [u8; 64] = cose
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| VanError::CryptoError("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(&sig_structure, &signature)
            .map_err(|e| VanError::CryptoError(e.to_string()))
    }
}
