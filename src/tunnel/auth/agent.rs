//! SSH agent authentication over a Unix domain socket.

use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use russh::client;
use russh::keys::agent::client::AgentClient;
use tracing::{debug, info};

use crate::tunnel::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Environment variable naming the agent socket
pub(crate) const AUTH_SOCK_ENV_VAR: &str = "SSH_AUTH_SOCK";

/// SSH agent authentication strategy.
///
/// The agent is contacted again on every handshake, so identities added or
/// removed while the tunnel runs are picked up by the next forwarded
/// connection.
#[derive(Debug, Clone, Default)]
pub struct AgentAuth {
    socket: Option<PathBuf>,
}

impl AgentAuth {
    /// Use the agent named by `SSH_AUTH_SOCK` at handshake time.
    pub fn new() -> Self {
        Self { socket: None }
    }

    /// Use the agent listening on `socket`.
    pub fn with_socket(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: Some(socket.into()),
        }
    }

    pub fn socket(&self) -> Option<&Path> {
        self.socket.as_deref()
    }

    fn socket_path(&self) -> Result<PathBuf, String> {
        match &self.socket {
            Some(path) => Ok(path.clone()),
            None => env::var_os(AUTH_SOCK_ENV_VAR)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| format!("{} is not set", AUTH_SOCK_ENV_VAR)),
        }
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let socket = self.socket_path()?;
        let mut agent = AgentClient::connect_uds(&socket)
            .await
            .map_err(|e| format!("SSH agent at {:?} unreachable: {}", socket, e))?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| format!("SSH agent refused to list identities: {}", e))?;
        if identities.is_empty() {
            return Err("SSH agent holds no identities".to_string());
        }

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let offered = identities.len();
        for (i, identity) in identities.into_iter().enumerate() {
            let comment = identity.comment().to_string();
            match handle
                .authenticate_publickey_with(username, identity, hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    info!(
                        "Authenticated as {} with agent identity {:?}",
                        username, comment
                    );
                    return Ok(true);
                }
                Ok(_) => debug!(
                    "Agent identity {:?} rejected ({} of {})",
                    comment,
                    i + 1,
                    offered
                ),
                Err(e) => debug!(
                    "Agent identity {:?} failed ({} of {}): {}",
                    comment,
                    i + 1,
                    offered,
                    e
                ),
            }
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_socket_wins() {
        let auth = AgentAuth::with_socket("/run/user/1000/agent.sock");
        assert_eq!(auth.socket(), Some(Path::new("/run/user/1000/agent.sock")));
        assert_eq!(
            auth.socket_path().unwrap(),
            PathBuf::from("/run/user/1000/agent.sock")
        );
    }

    #[test]
    fn test_default_defers_to_environment() {
        let auth = AgentAuth::new();
        assert!(auth.socket().is_none());
        assert_eq!(auth.name(), "agent");
    }
}
