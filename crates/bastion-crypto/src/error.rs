use std::path::PathBuf;

use crate::keys::KeyId;

/// Errors from key management, signing, and verification.
///
/// Messages never include private key material.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key file {path}: {source}")]
    KeyIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key id mismatch: stored={stored}, computed={computed}")]
    KeyIdMismatch { stored: String, computed: String },

    #[error("invalid key material in {0}")]
    InvalidKeyMaterial(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("signing key {0} is revoked")]
    Revoked(KeyId),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::KeyIo {
            path: path.into(),
            source,
        }
    }
}

impl From<bastion_types::TypeError> for CryptoError {
    fn from(e: bastion_types::TypeError) -> Self {
        Self::Encoding(e.to_string())
    }
}
