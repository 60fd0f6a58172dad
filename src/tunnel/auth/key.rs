//! Private key file SSH authentication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::tunnel::error::TunnelError;
use crate::tunnel::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Private key file authentication strategy.
///
/// The key is read and, when protected, decrypted once at construction so a
/// bad path or passphrase surfaces before the tunnel starts instead of on
/// every forwarded connection.
pub struct KeyAuth {
    key_path: PathBuf,
    key: Arc<keys::PrivateKey>,
}

impl KeyAuth {
    /// Load an unencrypted private key.
    pub fn from_file(key_path: impl Into<PathBuf>) -> Result<Self, TunnelError> {
        Self::load(key_path.into(), None)
    }

    /// Load a passphrase-protected private key.
    pub fn from_file_with_passphrase(
        key_path: impl Into<PathBuf>,
        passphrase: &str,
    ) -> Result<Self, TunnelError> {
        Self::load(key_path.into(), Some(passphrase))
    }

    fn load(key_path: PathBuf, passphrase: Option<&str>) -> Result<Self, TunnelError> {
        let key = keys::load_secret_key(&key_path, passphrase).map_err(|e| TunnelError::Key {
            path: key_path.clone(),
            reason: e.to_string(),
        })?;
        debug!("Loaded private key from {:?}", key_path);

        Ok(Self {
            key_path,
            key: Arc::new(key),
        })
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(self.key.clone(), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| format!("Key authentication failed: {}", e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
