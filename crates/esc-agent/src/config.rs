//! Agent configuration

use anyhow::{Context, Result};
use esc_core::{EscConfig, GatewayConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Ledger gateway connection
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Sensor endpoint polled on every harvest; empty records when unset
    #[serde(default)]
    pub sensor_url: Option<String>,

    /// Timeout of one sensor request in milliseconds
    #[serde(default = "default_sensor_timeout")]
    pub sensor_timeout_ms: u64,

    /// ESC instances run by this process
    #[serde(default = "default_escs")]
    pub escs: Vec<EscConfig>,
}

/// Gateway settings shared by every instance; each instance addresses
/// its own chaincode
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub base_url: String,
    pub channel: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            base_url: defaults.base_url,
            channel: defaults.channel,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

impl GatewaySettings {
    pub fn for_chaincode(&self, chaincode: &str) -> GatewayConfig {
        GatewayConfig {
            base_url: self.base_url.clone(),
            channel: self.channel.clone(),
            chaincode: chaincode.to_string(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_sensor_timeout() -> u64 {
    5000
}

fn default_escs() -> Vec<EscConfig> {
    vec![EscConfig::default()]
}

impl AgentConfig {
    /// Load configuration from an optional file, overlaid by `ESC__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ESC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read agent configuration")?;

        let mut agent: AgentConfig = config
            .try_deserialize()
            .context("invalid agent configuration")?;
        if agent.escs.is_empty() {
            agent.escs = default_escs();
        }
        Ok(agent)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }
}
