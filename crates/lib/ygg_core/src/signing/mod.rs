//! Profile property signing.
//!
//! Game clients verify texture properties with RSA PKCS#1 v1.5 over SHA-1;
//! the digest is fixed by the protocol. The key is loaded on first use and
//! kept for the life of the service.

pub mod textures;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::options::OptionStore;
use crate::store::StoreError;

/// Signing errors.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing key not configured: {0}")]
    Missing(String),

    #[error("Signing key unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signing key unparseable: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Signing failed: {0}")]
    Sign(String),
}

/// Where the PEM-encoded private key comes from.
pub enum KeySource {
    /// A PEM file on disk.
    File(PathBuf),
    /// PEM text supplied directly.
    Pem(String),
    /// An entry in the option store.
    Option {
        store: Arc<dyn OptionStore>,
        key: String,
    },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::File(path) => f.debug_tuple("File").field(path).finish(),
            KeySource::Pem(_) => f.write_str("Pem(..)"),
            KeySource::Option { key, .. } => f.debug_struct("Option").field("key", key).finish(),
        }
    }
}

/// A parsed key pair.
struct LoadedKey {
    signing_key: SigningKey<Sha1>,
    public_pem: String,
}

/// Signs payloads with the site's RSA key.
pub struct SigningService {
    source: KeySource,
    key: RwLock<Option<Arc<LoadedKey>>>,
}

impl fmt::Debug for SigningService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningService")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl SigningService {
    pub fn new(source: KeySource) -> Self {
        Self {
            source,
            key: RwLock::new(None),
        }
    }

    /// Load the key now so configuration problems surface at startup.
    pub async fn preload(&self) -> Result<(), SigningError> {
        self.loaded().await.map(|_| ())
    }

    async fn loaded(&self) -> Result<Arc<LoadedKey>, SigningError> {
        if let Some(key) = self.key.read().await.as_ref() {
            return Ok(key.clone());
        }

        let mut slot = self.key.write().await;
        // Another caller may have loaded it while we waited for the lock.
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }
        let pem = self.read_pem().await?;
        let private_key = parse_private_key(&pem)?;
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::Parse(format!("public key: {e}")))?;
        let loaded = Arc::new(LoadedKey {
            signing_key: SigningKey::<Sha1>::new(private_key),
            public_pem,
        });
        info!(source = ?self.source, "loaded profile signing key");
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    async fn read_pem(&self) -> Result<String, SigningError> {
        match &self.source {
            KeySource::File(path) => Ok(tokio::fs::read_to_string(path).await?),
            KeySource::Pem(pem) => Ok(pem.clone()),
            KeySource::Option { store, key } => store
                .get(key)
                .await?
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SigningError::Missing(format!("option {key:?} is empty"))),
        }
    }

    /// Base64 signature of `payload`.
    pub async fn sign(&self, payload: &str) -> Result<String, SigningError> {
        let key = self.loaded().await?;
        let signature = key
            .signing_key
            .try_sign(payload.as_bytes())
            .map_err(|e| SigningError::Sign(e.to_string()))?;
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    /// The public half as an SPKI PEM, for the API metadata document.
    pub async fn public_key_pem(&self) -> Result<String, SigningError> {
        Ok(self.loaded().await?.public_pem.clone())
    }
}

/// Parse a PKCS#8 or PKCS#1 PEM private key.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, SigningError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| SigningError::Parse(e.to_string()))
}


#[cfg(test)]
mod tests {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::pkcs8::DecodePublicKey;
    use rsa::signature::Verifier;

    use super::testing::{PKCS1_PEM, PKCS8_PEM};
    use super::*;
    use crate::options::{MemoryOptions, SIGNING_KEY_OPTION};

    fn verify(public_pem: &str, payload: &str, signature_b64: &str) -> bool {
        let public = RsaPublicKey::from_public_key_pem(public_pem).unwrap();
        let verifying = VerifyingKey::<Sha1>::new(public);
        let bytes = STANDARD.decode(signature_b64).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        verifying.verify(payload.as_bytes(), &signature).is_ok()
    }

    #[tokio::test]
    async fn signature_verifies_with_public_key() {
        let service = SigningService::new(KeySource::Pem(PKCS8_PEM.into()));
        let signature = service.sign("payload").await.unwrap();
        let public = service.public_key_pem().await.unwrap();
        assert!(public.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(verify(&public, "payload", &signature));
        assert!(!verify(&public, "payload!", &signature));
    }

    #[tokio::test]
    async fn pkcs1_and_pkcs8_keys_sign_identically() {
        let a = SigningService::new(KeySource::Pem(PKCS8_PEM.into()));
        let b = SigningService::new(KeySource::Pem(PKCS1_PEM.into()));
        // PKCS#1 v1.5 signatures are deterministic.
        assert_eq!(a.sign("x").await.unwrap(), b.sign("x").await.unwrap());
    }

    #[tokio::test]
    async fn loads_key_from_option_store() {
        let options = Arc::new(MemoryOptions::with_values([(SIGNING_KEY_OPTION, PKCS8_PEM)]));
        let service = SigningService::new(KeySource::Option {
            store: options,
            key: SIGNING_KEY_OPTION.into(),
        });
        service.preload().await.unwrap();
        assert!(!service.sign("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn loads_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, PKCS8_PEM).unwrap();
        let service = SigningService::new(KeySource::File(path));
        assert!(service.preload().await.is_ok());
    }

    #[tokio::test]
    async fn missing_or_bad_key_is_an_error() {
        let empty = SigningService::new(KeySource::Option {
            store: Arc::new(MemoryOptions::new()),
            key: SIGNING_KEY_OPTION.into(),
        });
        assert!(matches!(empty.preload().await, Err(SigningError::Missing(_))));

        let garbage = SigningService::new(KeySource::Pem("not a key".into()));
        assert!(matches!(garbage.sign("x").await, Err(SigningError::Parse(_))));

        let absent = SigningService::new(KeySource::File("/nonexistent/ygg.pem".into()));
        assert!(matches!(absent.preload().await, Err(SigningError::Io(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_loads_once() {
        let service = Arc::new(SigningService::new(KeySource::Pem(PKCS8_PEM.into())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = service.clone();
                tokio::spawn(async move { s.loaded().await.map(|k| Arc::as_ptr(&k) as usize) })
            })
            .collect();
        let mut ptrs = Vec::new();
        for h in handles {
            ptrs.push(h.await.unwrap().unwrap());
        }
        ptrs.dedup();
        assert_eq!(ptrs.len(), 1);
    }
}
