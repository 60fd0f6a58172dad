//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::tunnel::session::SshClientHandler;

/// Trait for SSH authentication strategies.
///
/// A strategy is consulted once per SSH handshake, and every forward worker
/// dials its own session, so implementations must be thread-safe and cheap
/// to reuse.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected
    /// * `Err(message)` - Error during the attempt
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String>;

    /// Name of this strategy, used in logs.
    fn name(&self) -> &'static str;
}
