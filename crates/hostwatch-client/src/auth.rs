//! Credentials for the remote service
//!
//! Two sources, in priority order:
//! 1. HOSTWATCH_USERNAME / HOSTWATCH_PASSWORD environment variables
//! 2. `username` / `password` from the configuration file

use hostwatch_core::{AgentConfig, AuthMethod, HostwatchError, Result};
use std::env;

pub const USERNAME_ENV: &str = "HOSTWATCH_USERNAME";
pub const PASSWORD_ENV: &str = "HOSTWATCH_PASSWORD";

/// Resolved credentials for the configured auth method
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    /// Client certificate, presented by the TLS layer outside the agent
    Cert,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Cert => write!(f, "Cert"),
        }
    }
}

/// Resolve credentials for `config`
///
/// BASIC authentication requires both a username and a password; a missing one
/// is a precondition failure reported before any network call.
pub fn resolve_credentials(config: &AgentConfig) -> Result<Credentials> {
    match config.auth_method {
        AuthMethod::Cert => Ok(Credentials::Cert),
        AuthMethod::Basic => {
            let username = env::var(USERNAME_ENV)
                .ok()
                .or_else(|| config.username.clone())
                .filter(|s| !s.is_empty());
            let password = env::var(PASSWORD_ENV)
                .ok()
                .or_else(|| config.password.clone())
                .filter(|s| !s.is_empty());

            match (username, password) {
                (Some(username), Some(password)) => {
                    tracing::debug!("Using BASIC authentication as {}", username);
                    Ok(Credentials::Basic { username, password })
                }
                _ => Err(HostwatchError::MissingCredentials(
                    "Username and password must be defined in configuration file with BASIC authentication method."
                        .to_string(),
                )),
            }
        }
    }
}
