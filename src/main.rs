#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::env;

use dotenv::dotenv;
use ssh_tunnel::{AgentAuth, AuthStrategy, KeyAuth, Tunnel, TunnelConfig};
use tracing::{info, warn};

/// Environment variable naming the SSH server
const SERVER_ENV_VAR: &str = "SSH_TUNNEL_SERVER";

/// Environment variable naming the remote destination
const REMOTE_ENV_VAR: &str = "SSH_TUNNEL_REMOTE";

/// Environment variable naming the local port or endpoint
const LOCAL_ENV_VAR: &str = "SSH_TUNNEL_LOCAL";

/// Environment variable naming the private key file
const KEY_ENV_VAR: &str = "SSH_TUNNEL_KEY";

/// Environment variable holding the private key passphrase
const KEY_PASSPHRASE_ENV_VAR: &str = "SSH_TUNNEL_KEY_PASSPHRASE";

fn required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    env::var(name).map_err(|_| format!("{} must be set", name).into())
}

fn build_config<A: AuthStrategy + 'static>(
    auth: A,
    server: &str,
    remote: &str,
    local: &str,
) -> Result<TunnelConfig, Box<dyn std::error::Error>> {
    info!("Using {} authentication for {}", auth.name(), server);
    Ok(TunnelConfig::new(server, auth, remote, local)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let server = required(SERVER_ENV_VAR)?;
    let remote = required(REMOTE_ENV_VAR)?;
    let local = env::var(LOCAL_ENV_VAR).unwrap_or_else(|_| "0".to_string());

    let config = match env::var(KEY_ENV_VAR) {
        Ok(key_path) => {
            let key = match env::var(KEY_PASSPHRASE_ENV_VAR) {
                Ok(passphrase) => KeyAuth::from_file_with_passphrase(key_path, &passphrase)?,
                Err(_) => KeyAuth::from_file(key_path)?,
            };
            build_config(key, &server, &remote, &local)?
        }
        Err(_) => build_config(AgentAuth::new(), &server, &remote, &local)?,
    };

    let tunnel = Tunnel::new(config);

    let closer = tunnel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, closing tunnel");
                closer.close();
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });

    let watcher = tunnel.clone();
    tokio::spawn(async move {
        if let Ok(local) = watcher.wait_listening().await {
            info!("Tunnel ready on {}", local);
        }
    });

    let report = tunnel.start().await?;
    info!(
        "Closed {} local and {} server connection(s)",
        report.local_attempts, report.server_attempts
    );

    Ok(())
}
