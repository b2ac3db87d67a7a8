//! Optional payload encryption
//!
//! Payloads are sealed with AES-256-GCM. The key is SHA-256 of the configured
//! secret and every sealed payload carries its own random 96-bit nonce:
//!
//! ```text
//! plain:  0x00 | payload
//! sealed: 0x01 | nonce (12 bytes) | ciphertext + tag
//! ```
//!
//! A cipher only opens payloads of its own kind: an encrypted store cannot
//! be read without the key and a plain payload inside an encrypted store is
//! rejected.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::EncryptionConfig;
use crate::errors::{DbError, DbResult};

const FLAG_PLAIN: u8 = 0x00;
const FLAG_SEALED: u8 = 0x01;
const NONCE_LEN: usize = 12;

/// Crypto error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorCode {
    /// Sealing failed
    TierCryptoSealFailed,
    /// Authentication tag mismatch, wrong key or malformed payload
    TierCryptoOpenFailed,
}

impl CryptoErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            CryptoErrorCode::TierCryptoSealFailed => "TIER_CRYPTO_SEAL_FAILED",
            CryptoErrorCode::TierCryptoOpenFailed => "TIER_CRYPTO_OPEN_FAILED",
        }
    }
}

/// Error raised by the payload cipher
#[derive(Debug, Clone)]
pub struct CryptoError {
    code: CryptoErrorCode,
    message: String,
}

impl CryptoError {
    fn seal_failed(message: impl Into<String>) -> Self {
        Self {
            code: CryptoErrorCode::TierCryptoSealFailed,
            message: message.into(),
        }
    }

    fn open_failed(message: impl Into<String>) -> Self {
        Self {
            code: CryptoErrorCode::TierCryptoOpenFailed,
            message: message.into(),
        }
    }

    pub fn code(&self) -> CryptoErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CryptoError {}

impl From<CryptoError> for DbError {
    fn from(err: CryptoError) -> Self {
        DbError::IntegrityFailure(err.to_string())
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Seals and opens payloads. Cheap to clone; disabled ciphers pass payloads
/// through behind a plain marker byte.
#[derive(Clone, Default)]
pub struct PayloadCipher {
    key: Option<Arc<Aes256Gcm>>,
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PayloadCipher {
    /// Pass-through cipher
    pub fn disabled() -> Self {
        Self { key: None }
    }

    /// AES-256-GCM keyed by SHA-256 of `secret`
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new(&digest);
        Self {
            key: Some(Arc::new(cipher)),
        }
    }

    pub fn from_config(config: &EncryptionConfig) -> DbResult<Self> {
        Ok(match config.resolve_secret()? {
            Some(secret) => Self::from_secret(&secret),
            None => Self::disabled(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Seal `plaintext` for storage
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = match &self.key {
            Some(cipher) => cipher,
            None => {
                let mut out = Vec::with_capacity(plaintext.len() + 1);
                out.push(FLAG_PLAIN);
                out.extend_from_slice(plaintext);
                return Ok(out);
            }
        };

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::seal_failed("AES-GCM encryption failed"))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(FLAG_SEALED);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a payload produced by `seal`
    pub fn open(&self, stored: &[u8]) -> CryptoResult<Vec<u8>> {
        let (flag, rest) = stored
            .split_first()
            .ok_or_else(|| CryptoError::open_failed("empty payload"))?;

        match (*flag, &self.key) {
            (FLAG_PLAIN, None) => Ok(rest.to_vec()),
            (FLAG_PLAIN, Some(_)) => Err(CryptoError::open_failed(
                "unencrypted payload in an encrypted store",
            )),
            (FLAG_SEALED, None) => Err(CryptoError::open_failed(
                "payload is encrypted but no key is configured",
            )),
            (FLAG_SEALED, Some(cipher)) => {
                if rest.len() < NONCE_LEN {
                    return Err(CryptoError::open_failed("sealed payload shorter than nonce"));
                }
                let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| CryptoError::open_failed("authentication failed (wrong key?)"))
            }
            (other, _) => Err(CryptoError::open_failed(format!(
                "unknown payload flag 0x{:02x}",
                other
            ))),
        }
    }
}
