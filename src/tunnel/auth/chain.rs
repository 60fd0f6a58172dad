//! Fallback across several authentication strategies.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use crate::tunnel::session::SshClientHandler;

use super::traits::AuthStrategy;
use super::{AgentAuth, KeyAuth};

/// Tries each strategy in turn until one is accepted.
///
/// Rejections and errors from earlier strategies are collected, so when
/// nothing is accepted the reported reason names every attempt.
///
/// ```no_run
/// use ssh_tunnel::{AuthChain, KeyAuth};
///
/// # fn build() -> Result<AuthChain, ssh_tunnel::TunnelError> {
/// let chain = AuthChain::new()
///     .with_key(KeyAuth::from_file("/home/ops/.ssh/id_ed25519")?)
///     .with_agent();
/// # Ok(chain)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct AuthChain {
    strategies: Vec<Arc<dyn AuthStrategy>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(self, key: KeyAuth) -> Self {
        self.with_strategy(key)
    }

    /// Fall back to the agent named by `SSH_AUTH_SOCK`.
    pub fn with_agent(self) -> Self {
        self.with_strategy(AgentAuth::new())
    }

    pub fn with_strategy(mut self, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }
}

#[async_trait]
impl AuthStrategy for AuthChain {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        if self.strategies.is_empty() {
            return Err("no authentication strategy configured".to_string());
        }

        let mut reasons = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            match strategy.authenticate(handle, username).await {
                Ok(true) => {
                    debug!("Authenticated as {} via {}", username, strategy.name());
                    return Ok(true);
                }
                Ok(false) => reasons.push(format!("{}: rejected", strategy.name())),
                Err(e) => reasons.push(format!("{}: {}", strategy.name(), e)),
            }
            debug!("Authentication via {} did not succeed", strategy.name());
        }

        Err(reasons.join("; "))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
