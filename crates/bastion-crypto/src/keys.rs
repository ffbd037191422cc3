//! On-disk Ed25519 keypair management.
//!
//! A keypair lives in three files inside the key directory:
//!
//! | file | content | mode |
//! |---|---|---|
//! | `ledger-signing-key` | raw 32-byte secret | 0600 |
//! | `ledger-signing-key.pub` | raw 32-byte public key | 0644 |
//! | `ledger-signing-key.id` | hex SHA-256 of the public key | 0644 |

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bastion_types::{Sha256Digest, TypeError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CryptoError;
use crate::signer::{SigningKey, VerifyingKey};

/// Default base name of the ledger keypair files.
pub const DEFAULT_KEY_NAME: &str = "ledger-signing-key";

/// Identifier of a signing key: SHA-256 of its raw public key bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Sha256Digest);

impl KeyId {
    pub fn for_public_bytes(bytes: &[u8; 32]) -> Self {
        Self(Sha256Digest::of(bytes))
    }

    pub fn digest(&self) -> &Sha256Digest {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.0.short_hex())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for KeyId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Sha256Digest::from_hex(s)?))
    }
}

/// A loaded keypair.
#[derive(Debug)]
pub struct KeyRecord {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
    pub key_id: KeyId,
}

impl KeyRecord {
    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let key_id = verifying_key.key_id();
        Self {
            signing_key,
            verifying_key,
            key_id,
        }
    }

    /// A fresh keypair that lives only in memory.
    pub fn ephemeral() -> Self {
        Self::from_signing_key(SigningKey::generate())
    }
}

/// Creates, stores, and loads the ledger keypair.
#[derive(Debug, Clone)]
pub struct KeyManager {
    key_dir: PathBuf,
    name: String,
}

impl KeyManager {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            name: DEFAULT_KEY_NAME.to_string(),
        }
    }

    /// Use a different base file name inside the same directory.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    pub fn private_path(&self) -> PathBuf {
        self.key_dir.join(&self.name)
    }

    pub fn public_path(&self) -> PathBuf {
        self.key_dir.join(format!("{}.pub", self.name))
    }

    pub fn id_path(&self) -> PathBuf {
        self.key_dir.join(format!("{}.id", self.name))
    }

    /// Load the keypair if present, otherwise generate and persist a new one.
    pub fn get_or_create_keypair(&self) -> Result<KeyRecord, CryptoError> {
        if self.private_path().exists() {
            return self.load();
        }
        self.create()
    }

    /// Generate a new keypair and write all three files.
    ///
    /// Fails if a private key already exists at the target path.
    pub fn create(&self) -> Result<KeyRecord, CryptoError> {
        fs::create_dir_all(&self.key_dir).map_err(|e| CryptoError::io(&self.key_dir, e))?;

        let record = KeyRecord::from_signing_key(SigningKey::generate());
        write_new(&self.private_path(), record.signing_key.secret_bytes(), 0o600)?;
        write_new(&self.public_path(), &record.verifying_key.as_bytes(), 0o644)?;
        write_new(&self.id_path(), record.key_id.to_hex().as_bytes(), 0o644)?;

        info!(key_id = %record.key_id, dir = %self.key_dir.display(), "generated ledger signing key");
        Ok(record)
    }

    /// Load an existing keypair, checking the stored id and that the private
    /// key derives the stored public key.
    pub fn load(&self) -> Result<KeyRecord, CryptoError> {
        let secret = read_key_bytes(&self.private_path())?;
        let public = read_key_bytes(&self.public_path())?;
        let stored_id = read_file(&self.id_path())?;
        let stored_id = String::from_utf8_lossy(&stored_id).trim().to_string();

        let verifying_key = VerifyingKey::from_bytes(public)?;
        let computed = verifying_key.key_id();
        if stored_id != computed.to_hex() {
            return Err(CryptoError::KeyIdMismatch {
                stored: stored_id,
                computed: computed.to_hex(),
            });
        }

        let signing_key = SigningKey::from_bytes(secret);
        if signing_key.verifying_key() != verifying_key {
            return Err(CryptoError::InvalidKeyMaterial(
                self.private_path().display().to_string(),
            ));
        }

        debug!(key_id = %computed, "loaded ledger signing key");
        Ok(KeyRecord {
            signing_key,
            verifying_key,
            key_id: computed,
        })
    }

    /// Load only the public half (for verifiers that never sign).
    pub fn public_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(read_key_bytes(&self.public_path())?)
    }

    pub fn key_id(&self) -> Result<KeyId, CryptoError> {
        Ok(self.public_key()?.key_id())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CryptoError> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CryptoError::KeyNotFound(path.display().to_string()),
        _ => CryptoError::io(path, e),
    })
}

pub(crate) fn read_key_bytes(path: &Path) -> Result<[u8; 32], CryptoError> {
    let bytes = read_file(path)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyMaterial(path.display().to_string()))
}

fn write_new(path: &Path, contents: &[u8], mode: u32) -> Result<(), CryptoError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).map_err(|e| CryptoError::io(path, e))?;
    file.write_all(contents).map_err(|e| CryptoError::io(path, e))?;
    file.sync_all().map_err(|e| CryptoError::io(path, e))
}
