//! Configuration for the tula-io daemon
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty file gives a server reading EL05 frames from `/dev/ttyUSB0`.

use crate::decoder::{DecodeLimits, ScaleFormat};
use crate::error::{Error, Result};
use crate::hub::HubConfig;
use crate::stream::StreamConfig;
use crate::streaming::WireFormat;
use crate::tare::{NetMode, TareCatalog, TareConfiguration, TareSelection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub scale: ScaleConfig,
    pub decoder: DecodeLimits,
    pub stream: StreamSettings,
    pub hub: HubSettings,
    pub logging: LoggingConfig,
    pub tare: TareSettings,
}

/// Serial device settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0" or "COM4")
    pub port: String,
    pub baud_rate: u32,
    pub format: ScaleFormat,
    /// Longest a single serial read blocks
    pub read_timeout_ms: u64,
    /// Use the built-in simulated scale instead of the serial port
    pub simulate: bool,
    /// Simulated frame period
    pub simulate_interval_ms: u64,
    /// 0 draws from entropy
    pub simulate_seed: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            format: ScaleFormat::El05,
            read_timeout_ms: 100,
            simulate: false,
            simulate_interval_ms: 250,
            simulate_seed: 0,
        }
    }
}

/// Reading stream thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Silence before a stale reading is emitted
    pub stale_after_ms: u64,
    /// Consecutive bad frames that mark the link degraded
    pub degraded_after: u32,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stale_after_ms: 2000,
            degraded_after: 5,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 8000,
        }
    }
}

/// Which side of the hub this process plays
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HubMode {
    /// Own the scale and serve readings
    #[default]
    Server,
    /// Mirror a remote server
    Client,
}

/// Hub network settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HubSettings {
    pub mode: HubMode,
    /// Server: listen address
    pub bind_address: String,
    /// Client: server to join
    pub server_address: String,
    /// Server: password viewers must present; none means open access.
    /// Client: password to present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub client_name: String,
    pub wire_format: WireFormat,
    pub session_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub ping_interval_ms: u64,
    /// Client: server silence before the mirrored reading counts as stale
    pub stale_after_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mode: HubMode::Server,
            bind_address: "0.0.0.0:5555".to_string(),
            server_address: "127.0.0.1:5555".to_string(),
            password: None,
            client_name: "viewer".to_string(),
            wire_format: WireFormat::Json,
            session_timeout_ms: 5000,
            auth_timeout_ms: 5000,
            ping_interval_ms: 1000,
            stale_after_ms: 3000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Tare presets and the tare currently on the scale
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TareSettings {
    pub mode: NetMode,
    pub catalog: TareCatalog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<TareSelection>,
}

impl TareSettings {
    /// The configured tare, if one is selected
    pub fn configuration(&self) -> Result<Option<TareConfiguration>> {
        match &self.current {
            Some(selection) => Ok(Some(selection.resolve(&self.catalog)?)),
            None => Ok(None),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use tula_io::config::Config;
    ///
    /// let config = Config::load("tula.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.scale.simulate && self.scale.port.trim().is_empty() {
            return Err(invalid("scale.port is empty"));
        }
        if self.scale.baud_rate == 0 {
            return Err(invalid("scale.baud_rate must be positive"));
        }
        if self.scale.read_timeout_ms == 0 {
            return Err(invalid("scale.read_timeout_ms must be positive"));
        }

        let limits = &self.decoder;
        if !(limits.min_kg < limits.max_kg) {
            return Err(invalid(format!(
                "decoder.min_kg ({}) must be below decoder.max_kg ({})",
                limits.min_kg, limits.max_kg
            )));
        }
        if limits.el05_decimals > 5 {
            return Err(invalid("decoder.el05_decimals must be at most 5"));
        }

        let stream = &self.stream;
        if stream.stale_after_ms == 0 || stream.degraded_after == 0 {
            return Err(invalid(
                "stream.stale_after_ms and stream.degraded_after must be positive",
            ));
        }
        if stream.reconnect_initial_ms == 0 || stream.reconnect_initial_ms > stream.reconnect_max_ms
        {
            return Err(invalid(
                "stream.reconnect_initial_ms must be positive and not above reconnect_max_ms",
            ));
        }

        let hub = &self.hub;
        if hub.ping_interval_ms == 0 || hub.ping_interval_ms >= hub.session_timeout_ms {
            return Err(invalid(
                "hub.ping_interval_ms must be positive and below hub.session_timeout_ms",
            ));
        }
        if hub.auth_timeout_ms == 0 {
            return Err(invalid("hub.auth_timeout_ms must be positive"));
        }

        log::LevelFilter::from_str(&self.logging.level)
            .map_err(|_| invalid(format!("unknown log level '{}'", self.logging.level)))?;

        self.tare.catalog.validate()?;
        self.tare.configuration()?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.scale.read_timeout_ms)
    }

    pub fn simulate_interval(&self) -> Duration {
        Duration::from_millis(self.scale.simulate_interval_ms)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            stale_after: Duration::from_millis(self.stream.stale_after_ms),
            degraded_after: self.stream.degraded_after,
            reconnect_initial: Duration::from_millis(self.stream.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.stream.reconnect_max_ms),
            limits: self.decoder,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            bind_address: self.hub.bind_address.clone(),
            session_timeout: Duration::from_millis(self.hub.session_timeout_ms),
            auth_timeout: Duration::from_millis(self.hub.auth_timeout_ms),
            ping_interval: Duration::from_millis(self.hub.ping_interval_ms),
            stale_after: Duration::from_millis(self.hub.stale_after_ms),
            reconnect_initial: Duration::from_millis(self.stream.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.stream.reconnect_max_ms),
            wire_format: self.hub.wire_format,
            client_name: self.hub.client_name.clone(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::Config(reason.into())
}
