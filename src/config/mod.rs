//! Daemon connection configuration
//!
//! Operator-supplied overrides for where and how to reach the coin daemon.
//! Ports default to the network profile's values; only the host and RPC
//! credentials normally need setting.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;

use crate::profile::NetworkProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// P2P port override; defaults to the profile's port.
    #[serde(default)]
    pub p2p_port: Option<u16>,

    /// RPC port override; defaults to the profile's port.
    #[serde(default)]
    pub rpc_port: Option<u16>,

    #[serde(default)]
    pub rpc_user: Option<String>,

    #[serde(default)]
    pub rpc_password: Option<String>,

    /// Per-request RPC timeout in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            p2p_port: None,
            rpc_port: None,
            rpc_user: None,
            rpc_password: None,
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl DaemonConfig {
    /// Resolve the daemon's P2P socket address.
    pub async fn p2p_addr(&self, profile: &NetworkProfile) -> Result<SocketAddr> {
        let port = self.p2p_port.unwrap_or(profile.p2p_port);
        lookup_host((self.host.as_str(), port))
            .await
            .with_context(|| format!("resolving daemon host {}", self.host))?
            .next()
            .with_context(|| format!("daemon host {} resolved to no addresses", self.host))
    }

    /// RPC endpoint URL.
    pub fn rpc_url(&self, profile: &NetworkProfile) -> String {
        let port = self.rpc_port.unwrap_or(profile.rpc_port);
        format!("http://{}:{}/", self.host, port)
    }

    pub fn rpc_auth(&self) -> Option<(String, String)> {
        match (&self.rpc_user, &self.rpc_password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}
