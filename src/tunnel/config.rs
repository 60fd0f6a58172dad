//! Tunnel configuration and its resolution from the environment.
//!
//! Tunable values follow a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_TUNNEL_MAX_ATTEMPTS` | 1 | SSH dial attempts per forwarded connection |
//! | `SSH_TUNNEL_RETRY_DELAY_MS` | 0ms | Initial delay between dial attempts |
//! | `SSH_TUNNEL_CONNECT_TIMEOUT` | 30s | Timeout for one dial attempt in seconds |
//! | `SSH_TUNNEL_USER` | `$USER` | Username when the server endpoint carries none |

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::auth::AuthStrategy;
use super::endpoint::Endpoint;
use super::error::TunnelError;

/// Default number of SSH dial attempts per forwarded connection
pub(crate) const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 1;

/// Default delay before the first retry in milliseconds (immediate retry)
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 0;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Port used for the SSH server when the endpoint names none
pub(crate) const DEFAULT_SSH_PORT: u16 = 22;

/// Host the local listener binds to when only a port is supplied
pub(crate) const DEFAULT_LOCAL_HOST: &str = "localhost";

/// Maximum retry delay cap (10 seconds)
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Environment variable name for SSH dial attempts
pub(crate) const MAX_ATTEMPTS_ENV_VAR: &str = "SSH_TUNNEL_MAX_ATTEMPTS";

/// Environment variable name for the initial retry delay in milliseconds
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_TUNNEL_RETRY_DELAY_MS";

/// Environment variable name for SSH connection timeout
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_TUNNEL_CONNECT_TIMEOUT";

/// Environment variable name for the SSH username override
pub(crate) const USER_ENV_VAR: &str = "SSH_TUNNEL_USER";

/// Conventional login name variable, consulted last
pub(crate) const LOGIN_USER_ENV_VAR: &str = "USER";

/// Resolve a tunable with priority: parameter -> env var -> default.
///
/// An environment value that does not parse is ignored.
fn resolve<T: FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.trim().parse::<T>()
    {
        return value;
    }

    default
}

pub(crate) fn resolve_max_attempts(attempts_param: Option<u32>) -> u32 {
    resolve(
        attempts_param,
        MAX_ATTEMPTS_ENV_VAR,
        DEFAULT_MAX_CONNECTION_ATTEMPTS,
    )
}

pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    resolve(
        retry_delay_param,
        RETRY_DELAY_MS_ENV_VAR,
        DEFAULT_RETRY_DELAY_MS,
    )
}

/// Connection timeout in seconds.
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    resolve(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    )
}

/// Resolve the SSH username with priority: endpoint user -> override env var -> `$USER`
pub(crate) fn resolve_username(endpoint_user: Option<&str>) -> Option<String> {
    if let Some(user) = endpoint_user {
        return Some(user.to_string());
    }

    [USER_ENV_VAR, LOGIN_USER_ENV_VAR]
        .into_iter()
        .filter_map(|name| env::var(name).ok())
        .find(|user| !user.is_empty())
}

/// Everything a [`Tunnel`](super::Tunnel) needs to run.
///
/// `max_connection_attempts` may be left at `0`; it is normalised to at least
/// one attempt when the tunnel starts.
#[derive(Clone)]
pub struct TunnelConfig {
    pub(crate) local: Endpoint,
    pub(crate) server: Endpoint,
    pub(crate) remote: Endpoint,
    pub(crate) auth: Arc<dyn AuthStrategy>,
    pub(crate) username: String,
    pub(crate) max_connection_attempts: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) connect_timeout: Duration,
}

impl TunnelConfig {
    /// Build a configuration for a single-use tunnel.
    ///
    /// * `server` - SSH hop in `[user@]host[:port]` form, port defaults to 22
    /// * `auth` - credentials presented to the SSH server
    /// * `destination` - address dialled from the SSH server
    /// * `local` - either a bare port (bound on `localhost`, `"0"` picks an
    ///   ephemeral port) or a full `host:port`
    pub fn new(
        server: &str,
        auth: impl AuthStrategy + 'static,
        destination: &str,
        local: &str,
    ) -> Result<Self, TunnelError> {
        let local = if local.contains(':') || local.contains('[') {
            Endpoint::parse(local)?
        } else {
            Endpoint::parse(&format!("{}:{}", DEFAULT_LOCAL_HOST, local))?
        };

        let server = Endpoint::parse(server)?.with_default_port(DEFAULT_SSH_PORT);
        let remote = Endpoint::parse(destination)?;

        let username = resolve_username(server.user()).ok_or_else(|| {
            TunnelError::Config(format!(
                "no username for {}: give user@host or set {}",
                server, USER_ENV_VAR
            ))
        })?;

        Ok(Self {
            local,
            server,
            remote,
            auth: Arc::new(auth),
            username,
            max_connection_attempts: resolve_max_attempts(None),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(None)),
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
        })
    }

    /// Override the local bind endpoint.
    pub fn with_local(mut self, local: Endpoint) -> Self {
        self.local = local;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_max_connection_attempts(mut self, attempts: u32) -> Self {
        self.max_connection_attempts = attempts;
        self
    }

    /// Initial delay between dial attempts; doubles per retry up to [`MAX_RETRY_DELAY`].
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn server(&self) -> &Endpoint {
        &self.server
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn max_connection_attempts(&self) -> u32 {
        self.max_connection_attempts
    }

    /// Attempts actually used by forward workers, never below one.
    pub(crate) fn effective_attempts(&self) -> u32 {
        self.max_connection_attempts.max(1)
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("local", &self.local)
            .field("server", &self.server)
            .field("remote", &self.remote)
            .field("auth", &self.auth.name())
            .field("username", &self.username)
            .field("max_connection_attempts", &self.max_connection_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
