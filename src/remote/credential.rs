//! Credential bundle handed to a remote channel

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;

pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Host, port, principal and secret for one remote machine.
///
/// Deserializable so the session layer can hand it over, but never
/// serialized, and the secret is redacted from `Debug`.
#[derive(Clone, Deserialize)]
pub struct RemoteCredential {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "username")]
    pub principal: String,
    #[serde(alias = "password")]
    secret: String,
}

impl RemoteCredential {
    /// Create a password credential
    pub fn new(
        host: impl Into<String>,
        port: u16,
        principal: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    /// Read `BIOFLOW_SSH_HOST`, `BIOFLOW_SSH_PORT`, `BIOFLOW_SSH_USER` and `BIOFLOW_SSH_PASSWORD`
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).with_context(|| format!("{} is not set", name));

        let port = match std::env::var("BIOFLOW_SSH_PORT") {
            Ok(p) => p
                .parse()
                .with_context(|| format!("BIOFLOW_SSH_PORT is not a port number: {}", p))?,
            Err(_) => DEFAULT_SSH_PORT,
        };

        Ok(Self::new(
            var("BIOFLOW_SSH_HOST")?,
            port,
            var("BIOFLOW_SSH_USER")?,
            var("BIOFLOW_SSH_PASSWORD")?,
        ))
    }

    /// Password for authentication
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// `host:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}
