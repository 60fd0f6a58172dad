//! Seams between the orchestrator and the SSH transport.
//!
//! The orchestrator never talks to russh directly. It asks an
//! [`SshConnector`] for a fresh [`ServerConnection`] per forwarded client and
//! opens one channel through it. [`RusshConnector`](super::client::RusshConnector)
//! is the production implementation.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::endpoint::Endpoint;
use super::error::TunnelError;

/// Byte stream relayed to and from a local client.
pub trait ChannelIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send + ?Sized> ChannelIo for T {}

/// A channel to the remote destination, boxed so any transport can supply it.
pub type BoxedStream = Pin<Box<dyn ChannelIo>>;

/// Dials SSH sessions to the tunnel server.
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Establish and authenticate one SSH session.
    ///
    /// Transient network failures are reported as [`TunnelError::Dial`] and
    /// retried by the caller; rejected credentials as
    /// [`TunnelError::Authentication`], which are not.
    async fn connect(&self, server: &Endpoint) -> Result<Arc<dyn ServerConnection>, TunnelError>;
}

/// An established SSH session to the tunnel server.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Open a logical channel to `remote` through this session.
    async fn open_channel(&self, remote: &Endpoint) -> Result<BoxedStream, TunnelError>;

    /// Close the session.
    ///
    /// Must be idempotent: every call after the first returns
    /// [`TunnelError::AlreadyClosed`].
    async fn close(&self) -> Result<(), TunnelError>;

    /// Human readable peer description for logs.
    fn describe(&self) -> String;
}
