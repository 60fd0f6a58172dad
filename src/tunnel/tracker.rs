//! Bookkeeping for connections that must be closed at teardown.
//!
//! Two ordered collections are kept: client-side connections appended by the
//! accept loop and SSH sessions appended by forward workers. Both are guarded
//! by one `tokio::sync::Mutex` because the accept loop and every worker write
//! concurrently.
//!
//! Teardown happens once. [`ConnectionTracker::close_all`] seals the tracker
//! before sweeping, and a session offered after that point is refused so the
//! worker closes it itself.
//!
//! Entries are never removed. A connection that finished long ago stays
//! tracked, together with its SSH session handle, until the tunnel closes;
//! the sweep then reports it as already closed. Memory therefore grows with
//! the number of connections accepted over the tunnel's lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TunnelError;
use super::transport::ServerConnection;

/// Upper bound on closing one SSH session during the sweep.
pub(crate) const SERVER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side half of a forwarded connection.
///
/// The socket itself is owned by its forward worker. Closing the tracked
/// handle severs the connection: the worker observes the sever, stops
/// relaying and drops the socket.
pub(crate) struct LocalConnection {
    peer: SocketAddr,
    closed: AtomicBool,
    severed: CancellationToken,
}

impl LocalConnection {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            closed: AtomicBool::new(false),
            severed: CancellationToken::new(),
        }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Close the connection; a second call yields [`TunnelError::AlreadyClosed`].
    pub(crate) fn close(&self) -> Result<(), TunnelError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TunnelError::AlreadyClosed);
        }
        self.severed.cancel();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the connection has been closed.
    pub(crate) async fn severed(&self) {
        self.severed.cancelled().await
    }
}

/// Number of connections currently registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackedCounts {
    pub local: usize,
    pub server: usize,
}

/// Outcome of the teardown sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Close attempts on client-side connections.
    pub local_attempts: usize,
    /// Close attempts on SSH sessions.
    pub server_attempts: usize,
    /// Attempts that found the connection already closed.
    pub already_closed: usize,
    /// Attempts that failed for any other reason.
    pub failures: usize,
}

#[derive(Default)]
struct Tracked {
    local: Vec<Arc<LocalConnection>>,
    server: Vec<Arc<dyn ServerConnection>>,
    sealed: bool,
}

#[derive(Default)]
pub(crate) struct ConnectionTracker {
    inner: Mutex<Tracked>,
}

impl ConnectionTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an accepted client connection, in acceptance order.
    pub(crate) async fn track_local(&self, peer: SocketAddr) -> Arc<LocalConnection> {
        let conn = Arc::new(LocalConnection::new(peer));
        self.inner.lock().await.local.push(conn.clone());
        conn
    }

    /// Register an established SSH session.
    ///
    /// Returns `false` once teardown has begun; the caller then owns the
    /// session's cleanup.
    pub(crate) async fn track_server(&self, conn: Arc<dyn ServerConnection>) -> bool {
        let mut tracked = self.inner.lock().await;
        if tracked.sealed {
            return false;
        }
        tracked.server.push(conn);
        true
    }

    pub(crate) async fn counts(&self) -> TrackedCounts {
        let tracked = self.inner.lock().await;
        TrackedCounts {
            local: tracked.local.len(),
            server: tracked.server.len(),
        }
    }

    /// Close every tracked connection exactly once, local ones first.
    ///
    /// Best effort: a failing close is logged and the sweep continues. A
    /// server close that exceeds [`SERVER_CLOSE_TIMEOUT`] counts as a failure.
    pub(crate) async fn close_all(&self) -> TeardownReport {
        let (local, server) = {
            let mut tracked = self.inner.lock().await;
            tracked.sealed = true;
            (tracked.local.clone(), tracked.server.clone())
        };

        let mut report = TeardownReport::default();

        let total = local.len();
        for (i, conn) in local.iter().enumerate() {
            debug!(
                "Closing the local connection from {} ({} of {})",
                conn.peer(),
                i + 1,
                total
            );
            report.local_attempts += 1;
            record(&mut report, conn.close(), "local connection");
        }

        let total = server.len();
        for (i, conn) in server.iter().enumerate() {
            debug!(
                "Closing the server connection to {} ({} of {})",
                conn.describe(),
                i + 1,
                total
            );
            report.server_attempts += 1;
            let result = tokio::time::timeout(SERVER_CLOSE_TIMEOUT, conn.close())
                .await
                .unwrap_or_else(|_| {
                    Err(TunnelError::Close {
                        what: format!("server connection {}", conn.describe()),
                        reason: format!("timed out after {:?}", SERVER_CLOSE_TIMEOUT),
                    })
                });
            record(&mut report, result, "server connection");
        }

        info!(
            "Closed {} local and {} server connection(s), {} failure(s)",
            report.local_attempts, report.server_attempts, report.failures
        );
        report
    }
}

fn record(report: &mut TeardownReport, result: Result<(), TunnelError>, what: &str) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_already_closed() => {
            debug!("The {} was already closed", what);
            report.already_closed += 1;
        }
        Err(e) => {
            warn!("Failed to close {}: {}", what, e);
            report.failures += 1;
        }
    }
}
