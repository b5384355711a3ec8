//! Key Material Loader (C2).
//!
//! Loads OpenSSH or PuTTY-PPK private keys with an optional passphrase,
//! validating existence and format. Results — successes *and* failures — are
//! cached by `(canonical path, passphrase hash)` so a bad key is parsed at
//! most once per batch no matter how many hosts share it.

pub mod openssh;
pub mod ppk;
pub mod strategy;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::ErrorKind;
use crate::types::{AuthMaterial, ErrorDescriptor, Secret};

/// Key material loaded and ready for authentication, shared by reference
/// across every session of a batch that uses it.
pub struct LoadedKey {
    pub private_key: russh::keys::PrivateKey,
}

type CacheKey = (String, u64);
type CacheEntry = Result<Arc<LoadedKey>, ErrorDescriptor>;

/// Per-batch cache, keyed by `(canonical path, passphrase hash)`. Dropped at
/// batch completion along with the `BatchRequest` that owns it.
#[derive(Default)]
pub struct KeyCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or return the cached result for) the key material described by
    /// `auth`. Returns `Ok(None)` for the password variant, which has no key
    /// material to load.
    pub async fn load(&self, auth: &AuthMaterial) -> Result<Option<Arc<LoadedKey>>, ErrorDescriptor> {
        let (path, passphrase) = match auth {
            AuthMaterial::Password { .. } => return Ok(None),
            AuthMaterial::OpensshKey { path, passphrase } => (path, passphrase),
            AuthMaterial::PpkKey { path, passphrase } => (path, passphrase),
        };

        let canonical = canonicalize_best_effort(path);
        let key = cache_key(&canonical, passphrase.as_ref());

        {
            let cache = self.entries.lock().await;
            if let Some(cached) = cache.get(&key) {
                return cached.clone().map(Some);
            }
        }

        let loaded = match auth {
            AuthMaterial::OpensshKey { passphrase, .. } => {
                openssh::load(path, passphrase.as_ref()).await
            }
            AuthMaterial::PpkKey { passphrase, .. } => ppk::load(path, passphrase.as_ref()).await,
            AuthMaterial::Password { .. } => unreachable!(),
        };

        let entry: CacheEntry = loaded.map(Arc::new);
        self.entries.lock().await.insert(key, entry.clone());
        entry.map(Some)
    }
}

fn canonicalize_best_effort(path: &Path) -> String {
    std::fs::canonicalize(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string_lossy().into_owned())
}

fn cache_key(canonical_path: &str, passphrase: Option<&Secret>) -> CacheKey {
    let mut hasher = Sha256::new();
    if let Some(p) = passphrase {
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();
    let hash = u64::from_be_bytes(digest[..8].try_into().expect("sha256 is >= 8 bytes"));
    (canonical_path.to_string(), hash)
}

/// Build a [`KeyMaterial`]-kind [`ErrorDescriptor`] from a lower-level cause.
pub(crate) fn key_material_error(detail: impl std::fmt::Display) -> ErrorDescriptor {
    ErrorDescriptor {
        kind: ErrorKind::KeyMaterial,
        message: format!("failed to load private key: {detail} (check key path and passphrase)"),
        retryable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn password_auth_has_no_key_material() {
        let cache = KeyCache::new();
        let auth = AuthMaterial::Password {
            secret: Secret::from("hunter2"),
        };
        let result = cache.load(&auth).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_key_file_is_classified_key_material() {
        let cache = KeyCache::new();
        let auth = AuthMaterial::OpensshKey {
            path: PathBuf::from("/does/not/exist/id_rsa"),
            passphrase: None,
        };
        let err = cache.load(&auth).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyMaterial);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn missing_key_failure_is_cached() {
        let cache = KeyCache::new();
        let auth = AuthMaterial::OpensshKey {
            path: PathBuf::from("/does/not/exist/id_rsa"),
            passphrase: None,
        };
        let first = cache.load(&auth).await;
        let second = cache.load(&auth).await;
        assert!(first.is_err());
        assert!(second.is_err());
        // Same cache key => the second call is served from `entries` rather
        // than re-reading the filesystem; observable indirectly by asserting
        // both are present (the cache map is not exposed for direct
        // inspection from outside the module).
        assert_eq!(cache.entries.lock().await.len(), 1);
    }
}
