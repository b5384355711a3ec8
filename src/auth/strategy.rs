//! Authentication strategies, one per `AuthMaterial` variant.
//!
//! Mirrors the Strategy-pattern split the ancestor server used for its
//! password/key/agent authentication methods, trimmed to the two methods
//! spec.md names (password, private key — no SSH-agent variant here).

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use super::LoadedKey;
use crate::transport::SshHandler;
use crate::types::Secret;

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshHandler>,
        username: &str,
    ) -> Result<bool, String>;

    fn name(&self) -> &'static str;
}

pub struct PasswordAuth<'a> {
    pub password: &'a Secret,
}

#[async_trait]
impl AuthStrategy for PasswordAuth<'_> {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let password = self
            .password
            .as_str()
            .ok_or_else(|| "password authentication failed: credential is not valid UTF-8".to_string())?;

        let result = handle
            .authenticate_password(username, password)
            .await
            .map_err(|e| format!("password authentication failed: {e}"))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

pub struct PrivateKeyAuth<'a> {
    pub key: &'a LoadedKey,
}

#[async_trait]
impl AuthStrategy for PrivateKeyAuth<'_> {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshHandler>,
        username: &str,
    ) -> Result<bool, String> {
        // RSA keys need the best mutually supported signature hash or the
        // server may reject the legacy SHA-1 `ssh-rsa` signature.
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("using rsa hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash =
            russh::keys::PrivateKeyWithHashAlg::new(std::sync::Arc::new(self.key.private_key.clone()), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| format!("key authentication failed: {e}"))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
