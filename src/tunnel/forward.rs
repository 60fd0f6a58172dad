//! Forward workers: one per accepted local connection.
//!
//! A worker carries its connection end to end:
//!
//! 1. **Dial**: establish an SSH session to the tunnel server, retrying up to
//!    the configured attempt budget. Exhaustion closes the local connection.
//! 2. **Channel**: open a `direct-tcpip` channel to the remote destination.
//!    Failure closes the session and the local connection; it is not retried.
//! 3. **Relay**: copy bytes in both directions concurrently. Each direction
//!    finishes on its own and propagates end-of-stream to its peer as a write
//!    shutdown, so a half-closed connection keeps draining the other way.
//!
//! Every failure is logged and stays inside the worker. Closing the tracked
//! local connection during teardown severs the worker at whatever stage it
//! is in.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::connect_with_retry;
use super::endpoint::Endpoint;
use super::error::TunnelError;
use super::tracker::{ConnectionTracker, LocalConnection};
use super::transport::{BoxedStream, ServerConnection, SshConnector};

/// Everything a forward worker needs, fixed when the tunnel starts listening.
pub(crate) struct ForwardContext {
    pub(crate) connector: Arc<dyn SshConnector>,
    pub(crate) tracker: Arc<ConnectionTracker>,
    pub(crate) server: Endpoint,
    pub(crate) remote: Endpoint,
    pub(crate) max_attempts: u32,
    pub(crate) retry_delay: Duration,
}

/// Bytes moved by a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RelayStats {
    pub(crate) local_to_remote: u64,
    pub(crate) remote_to_local: u64,
}

/// Run one forward worker until its connection is finished or severed.
pub(crate) async fn forward(
    ctx: Arc<ForwardContext>,
    stream: TcpStream,
    local: Arc<LocalConnection>,
) {
    let conn_id = Uuid::new_v4();

    tokio::select! {
        _ = local.severed() => {
            debug!("[{}] Connection from {} severed", conn_id, local.peer());
        }
        _ = run(&ctx, stream, &local, conn_id) => {}
    }
}

async fn run(ctx: &ForwardContext, stream: TcpStream, local: &LocalConnection, conn_id: Uuid) {
    let session = match connect_with_retry(
        ctx.connector.as_ref(),
        &ctx.server,
        ctx.max_attempts,
        ctx.retry_delay,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(
                "[{}] Dial failed, closing local connection from {}: {}",
                conn_id,
                local.peer(),
                e
            );
            abandon(stream, local, conn_id);
            return;
        }
    };
    info!("[{}] Connected to {} (1 of 2)", conn_id, ctx.server);

    if !ctx.tracker.track_server(session.clone()).await {
        debug!("[{}] Tunnel is closing, discarding new session", conn_id);
        close_server(session.as_ref(), conn_id).await;
        abandon(stream, local, conn_id);
        return;
    }

    let channel = match session.open_channel(&ctx.remote).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!("[{}] Remote dial error: {}", conn_id, e);
            close_server(session.as_ref(), conn_id).await;
            abandon(stream, local, conn_id);
            return;
        }
    };
    info!("[{}] Connected to {} (2 of 2)", conn_id, ctx.remote);

    let stats = relay(stream, channel, conn_id).await;
    debug!(
        "[{}] Relay finished: {} bytes sent, {} bytes received",
        conn_id, stats.local_to_remote, stats.remote_to_local
    );

    close_server(session.as_ref(), conn_id).await;
    close_local(local, conn_id);
}

/// Splice `local` and `remote` in both directions until both reach end-of-stream.
///
/// Copy failures are logged and end only their own direction.
pub(crate) async fn relay<L>(local: L, remote: BoxedStream, conn_id: Uuid) -> RelayStats
where
    L: AsyncRead + AsyncWrite + Send,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let (upstream, downstream) = tokio::join!(
        pipe(&mut local_read, &mut remote_write, "local -> remote"),
        pipe(&mut remote_read, &mut local_write, "remote -> local"),
    );

    let mut stats = RelayStats::default();
    match upstream {
        Ok(n) => stats.local_to_remote = n,
        Err(e) => warn!("[{}] {}", conn_id, e),
    }
    match downstream {
        Ok(n) => stats.remote_to_local = n,
        Err(e) => warn!("[{}] {}", conn_id, e),
    }
    stats
}

/// Copy one direction, then shut the writer down so the peer sees end-of-stream.
async fn pipe<R, W>(
    reader: &mut R,
    writer: &mut W,
    direction: &'static str,
) -> Result<u64, TunnelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(reader, writer)
        .await
        .map_err(|source| TunnelError::Relay { direction, source });

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown after {} failed: {}", direction, e);
    }
    copied
}

async fn close_server(session: &dyn ServerConnection, conn_id: Uuid) {
    match session.close().await {
        Ok(()) => {}
        Err(e) if e.is_already_closed() => {}
        Err(e) => warn!("[{}] Failed to close server connection: {}", conn_id, e),
    }
}

/// Close a connection that never reached the relay stage.
fn abandon(stream: TcpStream, local: &LocalConnection, conn_id: Uuid) {
    close_local(local, conn_id);
    drop(stream);
}

fn close_local(local: &LocalConnection, conn_id: Uuid) {
    if local.close().is_err() {
        debug!(
            "[{}] Local connection from {} already closed",
            conn_id,
            local.peer()
        );
    }
}
