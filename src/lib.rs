//! Local TCP port forwarding through a single SSH server.
//!
//! ```no_run
//! use ssh_tunnel::{KeyAuth, Tunnel, TunnelConfig};
//!
//! # async fn run() -> Result<(), ssh_tunnel::TunnelError> {
//! let auth = KeyAuth::from_file("/home/ops/.ssh/id_ed25519")?;
//! let config = TunnelConfig::new("ops@bastion.example.com", auth, "db.internal:5432", "0")?;
//! let tunnel = Tunnel::new(config);
//!
//! let closer = tunnel.clone();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     closer.close();
//! });
//!
//! tunnel.start().await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]

pub mod tunnel;

pub use tunnel::{
    AgentAuth, AuthChain, AuthStrategy, Endpoint, KeyAuth, Tunnel, TunnelConfig, TunnelError,
    TunnelState,
};
