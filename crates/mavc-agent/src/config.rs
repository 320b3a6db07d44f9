//! Agent configuration.

use mavc_core::protocol::DEFAULT_BASE_PORT;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Monitor host name or IP address
    pub monitor_host: String,
    /// Rendezvous port; the per-vehicle port is `base_port + CID`
    pub base_port: u16,
    pub report_interval: Duration,
    pub geofence_poll_interval: Duration,
    /// Padding added to the measured distance before comparing with the radius
    pub geofence_margin_m: f64,
    /// How long the executor sleeps on an empty queue before re-checking
    pub executor_idle_poll: Duration,
    /// Wait per CID request before re-sending
    pub handshake_timeout: Duration,
    pub handshake_attempts: u32,
    pub connect_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            monitor_host: "127.0.0.1".to_string(),
            base_port: DEFAULT_BASE_PORT,
            report_interval: Duration::from_secs(1),
            geofence_poll_interval: Duration::from_millis(200),
            geofence_margin_m: 0.1,
            executor_idle_poll: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(2),
            handshake_attempts: 5,
            connect_attempts: 10,
        }
    }
}

impl AgentConfig {
    pub fn new(monitor_host: impl Into<String>, base_port: u16) -> Self {
        Self {
            monitor_host: monitor_host.into(),
            base_port,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `MAVC_MONITOR_HOST` and `MAVC_BASE_PORT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            monitor_host: env::var("MAVC_MONITOR_HOST").unwrap_or(defaults.monitor_host.clone()),
            base_port: env::var("MAVC_BASE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.base_port),
            ..defaults
        }
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_geofence(mut self, poll_interval: Duration, margin_m: f64) -> Self {
        self.geofence_poll_interval = poll_interval;
        self.geofence_margin_m = margin_m;
        self
    }

    pub fn with_executor_idle_poll(mut self, idle: Duration) -> Self {
        self.executor_idle_poll = idle;
        self
    }

    pub fn with_handshake(mut self, timeout: Duration, attempts: u32) -> Self {
        self.handshake_timeout = timeout;
        self.handshake_attempts = attempts.max(1);
        self
    }
}
