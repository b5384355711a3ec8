//! OpenSSH private key loading (PEM and the modern `openssh-key-v1` format).
//!
//! Delegates the actual parsing to `russh::keys::load_secret_key`, the same
//! entry point the ancestor server used for its own key-file authentication.
//! The file read and parse are synchronous, so they run on a blocking-pool
//! thread rather than stalling the async executor.

use std::path::{Path, PathBuf};

use russh::keys;

use crate::types::{ErrorDescriptor, Secret};

use super::{LoadedKey, key_material_error};

pub async fn load(path: &Path, passphrase: Option<&Secret>) -> Result<LoadedKey, ErrorDescriptor> {
    let path = path.to_path_buf();
    let passphrase = passphrase.and_then(|p| p.as_str().map(|s| s.to_string()));

    tokio::task::spawn_blocking(move || load_blocking(&path, passphrase.as_deref()))
        .await
        .map_err(|join_err| key_material_error(format!("key loader task panicked: {join_err}")))?
}

fn load_blocking(path: &PathBuf, passphrase: Option<&str>) -> Result<LoadedKey, ErrorDescriptor> {
    if !path.exists() {
        return Err(key_material_error(format!(
            "no such file or directory: {}",
            path.display()
        )));
    }

    let private_key = keys::load_secret_key(path, passphrase)
        .map_err(|e| key_material_error(format!("{} ({e})", path.display())))?;

    Ok(LoadedKey { private_key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonexistent_path_is_key_material_error() {
        let err = load(Path::new("/does/not/exist"), None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::KeyMaterial);
    }
}
