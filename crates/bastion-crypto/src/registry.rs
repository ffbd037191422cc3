use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::CryptoError;
use crate::keys::{read_key_bytes, KeyId};
use crate::signer::VerifyingKey;

/// Lookup of public keys and their revocation status.
///
/// The registry itself is owned elsewhere; verification only consults it.
pub trait KeyRegistry: Send + Sync {
    /// Public key for an id, if known.
    fn public_key(&self, key_id: &KeyId) -> Option<VerifyingKey>;

    /// Whether the key has been revoked.
    fn is_revoked(&self, key_id: &KeyId) -> bool;

    /// Resolve a key that is both known and not revoked.
    fn resolve(&self, key_id: &KeyId) -> Result<VerifyingKey, CryptoError> {
        let key = self
            .public_key(key_id)
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.to_hex()))?;
        if self.is_revoked(key_id) {
            return Err(CryptoError::Revoked(*key_id));
        }
        Ok(key)
    }
}

/// In-memory key registry.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyRegistry {
    keys: HashMap<KeyId, VerifyingKey>,
    revoked: HashSet<KeyId>,
}

impl InMemoryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a public key, returning its id.
    pub fn insert(&mut self, key: VerifyingKey) -> KeyId {
        let key_id = key.key_id();
        self.keys.insert(key_id, key);
        key_id
    }

    pub fn revoke(&mut self, key_id: KeyId) {
        self.revoked.insert(key_id);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load every `*.pub` file (raw 32-byte Ed25519 key) directly inside `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let dir = dir.as_ref();
        let mut registry = Self::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                CryptoError::io(dir, source)
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "pub") {
                continue;
            }
            let key = VerifyingKey::from_bytes(read_key_bytes(path)?)?;
            let key_id = registry.insert(key);
            debug!(key_id = %key_id, path = %path.display(), "registered public key");
        }

        Ok(registry)
    }
}

impl KeyRegistry for InMemoryKeyRegistry {
    fn public_key(&self, key_id: &KeyId) -> Option<VerifyingKey> {
        self.keys.get(key_id).cloned()
    }

    fn is_revoked(&self, key_id: &KeyId) -> bool {
        self.revoked.contains(key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyManager;
    use crate::signer::SigningKey;

    #[test]
    fn resolve_known_key() {
        let mut reg = InMemoryKeyRegistry::new();
        let vk = SigningKey::generate().verifying_key();
        let id = reg.insert(vk.clone());
        assert_eq!(reg.resolve(&id).unwrap(), vk);
    }

    #[test]
    fn unknown_key_is_not_found() {
        let reg = InMemoryKeyRegistry::new();
        let id = SigningKey::generate().verifying_key().key_id();
        assert!(matches!(reg.resolve(&id), Err(CryptoError::KeyNotFound(_))));
    }

    #[test]
    fn revoked_key_is_refused() {
        let mut reg = InMemoryKeyRegistry::new();
        let id = reg.insert(SigningKey::generate().verifying_key());
        reg.revoke(id);
        assert!(reg.is_revoked(&id));
        assert!(matches!(reg.resolve(&id), Err(CryptoError::Revoked(_))));
    }

    #[test]
    fn loads_pub_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let a = KeyManager::new(dir.path()).with_name("a").create().unwrap();
        let b = KeyManager::new(dir.path()).with_name("b").create().unwrap();

        let reg = InMemoryKeyRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.public_key(&a.key_id).is_some());
        assert!(reg.public_key(&b.key_id).is_some());
    }

    #[test]
    fn malformed_pub_file_fails_loading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.pub"), b"short").unwrap();
        let err = InMemoryKeyRegistry::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyMaterial(_)));
    }
}
