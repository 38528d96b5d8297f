//! Per-actor signing keys
//!
//! Keys are generated once, when an account is created, and never change.
//! Private keys live only in the repository and are read back through
//! `get_priv_key`.

use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data::Repository;
use crate::error::AppError;

pub const DEFAULT_KEY_BITS: usize = 2048;

/// PEM-encoded RSA key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key_pem: String,
    pub private_key_pem: String,
}

pub struct KeyStore {
    repo: Arc<dyn Repository>,
    key_bits: usize,
    generated: AtomicU64,
}

impl KeyStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self::with_key_bits(repo, DEFAULT_KEY_BITS)
    }

    /// Smaller keys make tests fast
    pub fn with_key_bits(repo: Arc<dyn Repository>, key_bits: usize) -> Self {
        Self {
            repo,
            key_bits,
            generated: AtomicU64::new(0),
        }
    }

    /// Key pairs generated by this store since startup
    pub fn keys_generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    /// Generate a fresh RSA key pair
    ///
    /// Runs on the blocking pool; generation takes a noticeable while.
    pub async fn make_key_pair(&self) -> Result<KeyPair, AppError> {
        let bits = self.key_bits;
        let key_pair = tokio::task::spawn_blocking(move || generate_key_pair(bits))
            .await
            .map_err(|e| AppError::Internal(e.into()))??;
        let total = self.generated.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(bits, total, "Generated key pair");
        Ok(key_pair)
    }

    /// # Errors
    /// `NotFound` if the actor does not exist
    pub async fn get_priv_key(&self, handle: &str) -> Result<String, AppError> {
        self.repo
            .get_private_key(handle)
            .await?
            .ok_or(AppError::NotFound)
    }
}

fn generate_key_pair(bits: usize) -> Result<KeyPair, AppError> {
    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, bits).map_err(|e| AppError::Internal(e.into()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(e.into()))?
        .to_string();
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(KeyPair {
        public_key_pem,
        private_key_pem,
    })
}
