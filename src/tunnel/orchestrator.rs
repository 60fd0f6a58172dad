//! The tunnel orchestrator: listener, accept loop and coordinated shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start/serve--> Listening --close signal--> Closing --sweep--> Closed
//! ```
//!
//! The accept loop races `accept` against the close signal in
//! `tokio::select!`, so shutdown is observed even while no client connects.
//! After the loop every tracked connection is closed once. Forward workers are
//! not cancelled directly; they stop when their local connection is severed
//! by the sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::client::RusshConnector;
use super::config::TunnelConfig;
use super::endpoint::Endpoint;
use super::error::TunnelError;
use super::forward::{ForwardContext, forward};
use super::tracker::{ConnectionTracker, TeardownReport, TrackedCounts};
use super::transport::SshConnector;

/// Lifecycle state of a [`Tunnel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Created,
    Listening,
    Closing,
    Closed,
}

/// A single-use SSH port-forwarding tunnel.
///
/// Cloning is cheap and every clone controls the same tunnel, so one clone
/// can run [`start`](Self::start) on a task while another calls
/// [`close`](Self::close).
#[derive(Clone)]
pub struct Tunnel {
    inner: Arc<TunnelInner>,
}

struct TunnelInner {
    config: TunnelConfig,
    connector: Arc<dyn SshConnector>,
    tracker: Arc<ConnectionTracker>,
    close_signal: CancellationToken,
    state: watch::Sender<TunnelState>,
    started: AtomicBool,
    /// Port the listener actually bound, `0` until then.
    bound_port: AtomicU16,
}

impl Tunnel {
    /// Create a tunnel that dials the server with russh.
    pub fn new(config: TunnelConfig) -> Self {
        let connector = Arc::new(RusshConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    /// Create a tunnel over a custom SSH transport.
    ///
    /// The connector replaces russh entirely; the configured authentication
    /// strategy is only used by connectors that consult it.
    pub fn with_connector(config: TunnelConfig, connector: Arc<dyn SshConnector>) -> Self {
        let (state, _) = watch::channel(TunnelState::Created);
        Self {
            inner: Arc::new(TunnelInner {
                config,
                connector,
                tracker: Arc::new(ConnectionTracker::new()),
                close_signal: CancellationToken::new(),
                state,
                started: AtomicBool::new(false),
                bound_port: AtomicU16::new(0),
            }),
        }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> TunnelState {
        *self.inner.state.borrow()
    }

    /// The local endpoint, carrying the bound port once listening.
    pub fn local_endpoint(&self) -> Endpoint {
        let local = self.inner.config.local.clone();
        match self.inner.bound_port.load(Ordering::SeqCst) {
            0 => local,
            port => local.with_port(port),
        }
    }

    /// Wait until the listener is bound and return the resolved local endpoint.
    ///
    /// # Errors
    ///
    /// [`TunnelError::NotListening`] if the tunnel closed without binding.
    pub async fn wait_listening(&self) -> Result<Endpoint, TunnelError> {
        let mut rx = self.inner.state.subscribe();
        rx.wait_for(|state| *state != TunnelState::Created)
            .await
            .map_err(|_| TunnelError::NotListening)?;

        if self.inner.bound_port.load(Ordering::SeqCst) == 0 {
            return Err(TunnelError::NotListening);
        }
        Ok(self.local_endpoint())
    }

    /// Connections currently registered for teardown.
    pub async fn tracked(&self) -> TrackedCounts {
        self.inner.tracker.counts().await
    }

    /// Bind the local endpoint and serve until closed.
    ///
    /// # Errors
    ///
    /// [`TunnelError::Bind`] if the listener cannot be bound,
    /// [`TunnelError::Accept`] if it breaks while serving,
    /// [`TunnelError::AlreadyStarted`] on a second call.
    pub async fn start(&self) -> Result<TeardownReport, TunnelError> {
        self.claim_start()?;

        let address = self.inner.config.local.to_string();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                error!("Listen error on {}: {}", address, source);
                self.set_state(TunnelState::Closed);
                return Err(TunnelError::Bind { address, source });
            }
        };

        self.run(listener).await
    }

    /// Serve on an already bound listener until closed.
    pub async fn serve(&self, listener: TcpListener) -> Result<TeardownReport, TunnelError> {
        self.claim_start()?;
        self.run(listener).await
    }

    /// Request shutdown.
    ///
    /// The signal is latched: repeated calls are no-ops, and a call before
    /// `start` makes the tunnel shut down as soon as it has bound.
    pub fn close(&self) {
        if !self.inner.close_signal.is_cancelled() {
            debug!("Close requested for tunnel on {}", self.local_endpoint());
        }
        self.inner.close_signal.cancel();
    }

    fn claim_start(&self) -> Result<(), TunnelError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TunnelError::AlreadyStarted);
        }
        Ok(())
    }

    fn set_state(&self, state: TunnelState) {
        self.inner.state.send_replace(state);
    }

    async fn run(&self, listener: TcpListener) -> Result<TeardownReport, TunnelError> {
        let bound = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.set_state(TunnelState::Closed);
                return Err(TunnelError::Bind {
                    address: self.inner.config.local.to_string(),
                    source: e,
                });
            }
        };

        // The only post-construction update of the local endpoint, made
        // before anything can observe the Listening state.
        self.inner.bound_port.store(bound.port(), Ordering::SeqCst);

        let config = &self.inner.config;
        let ctx = Arc::new(ForwardContext {
            connector: self.inner.connector.clone(),
            tracker: self.inner.tracker.clone(),
            server: config.server.clone(),
            remote: config.remote.clone(),
            max_attempts: config.effective_attempts(),
            retry_delay: config.retry_delay,
        });

        self.set_state(TunnelState::Listening);
        info!(
            "Listening for new connections on {} (forwarding to {} via {})",
            self.local_endpoint(),
            config.remote,
            config.server
        );

        let outcome = self.accept_loop(&listener, &ctx).await;
        drop(listener);

        self.set_state(TunnelState::Closing);
        let report = self.inner.tracker.close_all().await;
        self.set_state(TunnelState::Closed);
        info!("Tunnel closed");

        outcome.map(|()| report)
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        ctx: &Arc<ForwardContext>,
    ) -> Result<(), TunnelError> {
        loop {
            tokio::select! {
                biased;

                _ = self.inner.close_signal.cancelled() => {
                    info!("Close signal received, closing...");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let local = self.inner.tracker.track_local(peer).await;
                            info!("Accepted connection from {}", peer);
                            tokio::spawn(forward(ctx.clone(), stream, local));
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            return Err(TunnelError::Accept(e));
                        }
                    }
                }
            }
        }
    }
}
