//! Monitor configuration from environment.

use mavc_core::protocol::DEFAULT_BASE_PORT;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the rendezvous and per-vehicle sockets bind to
    pub bind_host: IpAddr,
    pub base_port: u16,
    pub api_port: u16,
    /// A vehicle silent for longer than this is reported stale
    pub stale_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: DEFAULT_BASE_PORT,
            api_port: 3000,
            stale_after: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_host: env::var("MAVC_BIND_HOST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bind_host),
            base_port: env::var("MAVC_BASE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.base_port),
            api_port: env::var("MAVC_API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.api_port),
            stale_after: env::var("MAVC_STALE_AFTER_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
        }
    }

    /// Loopback config on the given base port.
    pub fn local(base_port: u16) -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port,
            ..Self::default()
        }
    }
}
