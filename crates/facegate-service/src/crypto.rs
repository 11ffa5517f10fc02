//! Sealing of embedding blobs at rest.
//!
//! Embeddings are biometric data, so they are never written to the database
//! in the clear. AES-256-GCM with a per-install key derived from a secret
//! file; the file is generated on first use with owner-only permissions.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;
/// Domain separation for the key derivation, bumped on format changes.
const KEY_CONTEXT: &[u8] = b"facegate-embedding-sealing-v1";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sealing failed")]
    Seal,
    #[error("unsealing failed (wrong key or corrupted record)")]
    Open,
    #[error("sealed blob shorter than its nonce")]
    Truncated,
}

/// AES-256-GCM sealer keyed from a secret file.
#[derive(Clone)]
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl Sealer {
    /// Key from the secret at `path`, generating it on first use.
    pub fn from_secret_file(path: &Path) -> Result<Sealer, CryptoError> {
        let secret = if path.exists() {
            fs::read(path)?
        } else {
            let mut secret = vec![0u8; SECRET_LEN];
            OsRng.fill_bytes(&mut secret);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &secret)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
            }
            tracing::info!(path = %path.display(), "generated sealing secret");
            secret
        };

        let mut hasher = Sha256::new();
        hasher.update(&secret);
        hasher.update(KEY_CONTEXT);
        let key_bytes = hasher.finalize();

        Ok(Sealer { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)) })
    }

    /// Seal a plaintext blob. Output layout: 12-byte nonce, then ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed blob. Fails on tampering, truncation, or a key mismatch.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Open)
    }
}
