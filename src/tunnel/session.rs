//! russh client handler used for every SSH hop.
//!
//! # Security Note
//!
//! Host keys are not verified: every server key is accepted, as with
//! `StrictHostKeyChecking=no` in OpenSSH. Deployments that need protection
//! against man-in-the-middle attacks must check the key against a
//! known_hosts source before trusting the tunnel.

use russh::{client, keys};
use tracing::debug;

/// Client handler for russh that accepts all host keys.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting unverified server host key ({})",
            server_public_key.algorithm()
        );
        Ok(true)
    }
}
