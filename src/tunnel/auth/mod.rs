//! Authentication strategies for the SSH hop.
//!
//! - [`KeyAuth`]: Private key file, optionally passphrase protected
//! - [`AgentAuth`]: Identities held by the SSH agent at `SSH_AUTH_SOCK`
//! - [`AuthChain`]: Several strategies tried in order

mod agent;
mod chain;
mod key;
mod traits;

pub use agent::AgentAuth;
pub use chain::AuthChain;
pub use key::KeyAuth;
pub use traits::AuthStrategy;
