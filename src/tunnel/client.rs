//! SSH session establishment for the tunnel hop.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: russh config without an inactivity timeout
//!    (tunnels may idle for hours) and with keepalives to detect dead peers.
//! 2. **Connection Establishment**: TCP connect and SSH handshake, bounded by
//!    the configured connect timeout.
//! 3. **Authentication**: the tunnel's [`AuthStrategy`].
//! 4. **Channel**: one `direct-tcpip` channel (RFC 4254) per session, opened
//!    towards the remote destination.
//!
//! ## Retry Strategy
//!
//! Dialling is retried with exponential backoff and jitter via `backon`:
//!
//! - **Attempts**: `max_connection_attempts` in total, at least one
//! - **Initial delay**: configurable; zero retries immediately
//! - **Maximum delay**: capped at [`MAX_RETRY_DELAY`]
//!
//! Only [`TunnelError::Dial`] is retried. Authentication failures are final.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use russh::client;
use tracing::{debug, info, warn};

use super::auth::AuthStrategy;
use super::config::{MAX_RETRY_DELAY, TunnelConfig};
use super::endpoint::Endpoint;
use super::error::TunnelError;
use super::session::SshClientHandler;
use super::transport::{BoxedStream, ServerConnection, SshConnector};

/// Originator address reported in `direct-tcpip` requests.
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";

/// Keepalive interval for tunnel sessions.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered keepalives before a session is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Build the russh client configuration shared by every tunnel session.
pub(crate) fn build_client_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    })
}

/// Dial `server`, retrying transient failures.
///
/// Makes at most `max_attempts` calls to [`SshConnector::connect`] (a value of
/// zero is treated as one). `min_delay` is the first backoff step.
pub(crate) async fn connect_with_retry(
    connector: &dyn SshConnector,
    server: &Endpoint,
    max_attempts: u32,
    min_delay: Duration,
) -> Result<Arc<dyn ServerConnection>, TunnelError> {
    let max_attempts = max_attempts.max(1);
    let attempt_counter = AtomicU32::new(0);

    let backoff = ExponentialBuilder::default()
        .with_min_delay(min_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times((max_attempts - 1) as usize)
        .with_jitter();

    let result = (|| async {
        let attempt = attempt_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > 1 {
            debug!(
                "Server dial attempt {}/{} to {}",
                attempt, max_attempts, server
            );
        }
        connector.connect(server).await
    })
    .retry(backoff)
    .when(|e| e.is_retryable())
    .notify(|err, dur| {
        warn!(
            "Server dial error: {}: attempt {}/{}, retrying in {:?}",
            err,
            attempt_counter.load(Ordering::SeqCst),
            max_attempts,
            dur
        );
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    match result {
        Ok(connection) => {
            if total_attempts > 1 {
                info!(
                    "Connected to {} after {} attempt(s)",
                    server, total_attempts
                );
            }
            Ok(connection)
        }
        Err(e) => {
            warn!(
                "Server dial error: {}: gave up after {} of {} attempt(s)",
                e, total_attempts, max_attempts
            );
            Err(e)
        }
    }
}

/// Production [`SshConnector`] backed by russh.
pub struct RusshConnector {
    config: Arc<client::Config>,
    auth: Arc<dyn AuthStrategy>,
    username: String,
    connect_timeout: Duration,
}

impl RusshConnector {
    pub fn new(
        auth: Arc<dyn AuthStrategy>,
        username: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            config: build_client_config(),
            auth,
            username: username.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(
            config.auth.clone(),
            config.username.clone(),
            config.connect_timeout,
        )
    }

    async fn handshake(
        &self,
        server: &Endpoint,
    ) -> Result<client::Handle<SshClientHandler>, TunnelError> {
        let mut handle = client::connect(
            self.config.clone(),
            (server.host(), server.port()),
            SshClientHandler,
        )
        .await
        .map_err(|e| TunnelError::Dial {
            server: server.to_string(),
            reason: format!("Failed to connect: {}", e),
        })?;

        let authenticated = self
            .auth
            .authenticate(&mut handle, &self.username)
            .await
            .map_err(|reason| TunnelError::Authentication {
                server: server.to_string(),
                user: self.username.clone(),
                reason,
            })?;

        if !authenticated {
            return Err(TunnelError::Authentication {
                server: server.to_string(),
                user: self.username.clone(),
                reason: format!("{} authentication rejected", self.auth.name()),
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, server: &Endpoint) -> Result<Arc<dyn ServerConnection>, TunnelError> {
        let handle = tokio::time::timeout(self.connect_timeout, self.handshake(server))
            .await
            .map_err(|_| TunnelError::Dial {
                server: server.to_string(),
                reason: format!("Connection timed out after {:?}", self.connect_timeout),
            })??;

        Ok(Arc::new(RusshSession {
            handle,
            server: server.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// An authenticated russh session.
struct RusshSession {
    handle: client::Handle<SshClientHandler>,
    server: String,
    closed: AtomicBool,
}

#[async_trait]
impl ServerConnection for RusshSession {
    async fn open_channel(&self, remote: &Endpoint) -> Result<BoxedStream, TunnelError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                remote.host(),
                u32::from(remote.port()),
                ORIGINATOR_ADDRESS,
                0, // Originator port is not significant for direct-tcpip
            )
            .await
            .map_err(|e| TunnelError::ChannelOpen {
                remote: remote.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::pin(channel.into_stream()))
    }

    async fn close(&self) -> Result<(), TunnelError> {
        if self.closed.swap(true, Ordering::SeqCst) || self.handle.is_closed() {
            return Err(TunnelError::AlreadyClosed);
        }

        self.handle
            .disconnect(russh::Disconnect::ByApplication, "tunnel closed", "en")
            .await
            .map_err(|e| TunnelError::Close {
                what: format!("server connection {}", self.server),
                reason: e.to_string(),
            })
    }

    fn describe(&self) -> String {
        self.server.clone()
    }
}
