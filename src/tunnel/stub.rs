//! Test support: an in-memory SSH transport and the environment lock.
//!
//! Channels are `tokio::io::duplex` pairs: the near end is relayed by the
//! forward worker, the far end is handed to the test through an unbounded
//! channel so it can play the remote destination.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::endpoint::Endpoint;
use super::error::TunnelError;
use super::transport::{BoxedStream, ServerConnection, SshConnector};

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Held by every test that touches the process environment, either by
/// writing it or by building a `TunnelConfig`, which reads it.
pub(crate) static ENV_TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Run `f` while no other test can change the environment.
pub(crate) fn env_locked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    f()
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum DialBehavior {
    Succeed,
    FailTimes(u32),
    AlwaysFail,
    RejectAuth,
}

pub(crate) struct StubConnector {
    behavior: DialBehavior,
    refuse_channels: bool,
    dials: AtomicU32,
    far_ends: mpsc::UnboundedSender<DuplexStream>,
    sessions: Mutex<Vec<Arc<StubSession>>>,
}

impl StubConnector {
    pub(crate) fn new(
        behavior: DialBehavior,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::build(behavior, false)
    }

    /// Dials succeed but every channel open is refused.
    pub(crate) fn refusing_channels() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::build(DialBehavior::Succeed, true)
    }

    fn build(
        behavior: DialBehavior,
        refuse_channels: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (far_ends, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            behavior,
            refuse_channels,
            dials: AtomicU32::new(0),
            far_ends,
            sessions: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    pub(crate) fn dials(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<StubSession>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SshConnector for StubConnector {
    async fn connect(&self, server: &Endpoint) -> Result<Arc<dyn ServerConnection>, TunnelError> {
        let attempt = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
        let dial_error = || TunnelError::Dial {
            server: server.to_string(),
            reason: "Connection refused".to_string(),
        };

        match self.behavior {
            DialBehavior::AlwaysFail => return Err(dial_error()),
            DialBehavior::FailTimes(n) if attempt <= n => return Err(dial_error()),
            DialBehavior::RejectAuth => {
                return Err(TunnelError::Authentication {
                    server: server.to_string(),
                    user: "ops".to_string(),
                    reason: "publickey rejected".to_string(),
                });
            }
            _ => {}
        }

        let session = Arc::new(StubSession {
            closed: AtomicBool::new(false),
            close_calls: AtomicU32::new(0),
            fail_close: false,
            hang_close: false,
            refuse_channels: self.refuse_channels,
            far_ends: Some(self.far_ends.clone()),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub(crate) struct StubSession {
    closed: AtomicBool,
    close_calls: AtomicU32,
    fail_close: bool,
    hang_close: bool,
    refuse_channels: bool,
    far_ends: Option<mpsc::UnboundedSender<DuplexStream>>,
}

impl StubSession {
    /// A detached session whose channels are always refused.
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            close_calls: AtomicU32::new(0),
            fail_close: false,
            hang_close: false,
            refuse_channels: true,
            far_ends: None,
        }
    }

    /// A detached session whose first close fails.
    pub(crate) fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::new()
        }
    }

    /// A detached session whose close never completes.
    pub(crate) fn hanging_close() -> Self {
        Self {
            hang_close: true,
            ..Self::new()
        }
    }

    pub(crate) fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerConnection for StubSession {
    async fn open_channel(&self, remote: &Endpoint) -> Result<BoxedStream, TunnelError> {
        let refused = || TunnelError::ChannelOpen {
            remote: remote.to_string(),
            reason: "connect refused".to_string(),
        };
        if self.refuse_channels || self.is_closed() {
            return Err(refused());
        }
        let far_ends = self.far_ends.as_ref().ok_or_else(refused)?;

        let (near, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        far_ends.send(far).map_err(|_| refused())?;
        Ok(Box::pin(near))
    }

    async fn close(&self) -> Result<(), TunnelError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_close {
            std::future::pending::<()>().await;
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TunnelError::AlreadyClosed);
        }
        if self.fail_close {
            return Err(TunnelError::Close {
                what: "stub session".to_string(),
                reason: "broken pipe".to_string(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "stub".to_string()
    }
}
