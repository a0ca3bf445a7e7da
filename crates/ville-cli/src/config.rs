//! Gateway configuration – reads/writes `ville-gateway.toml`.
//!
//! Every section is optional; a missing file or section yields the values
//! of the deployed Ville setup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ville_geometry::{AffineTransformConfig, CoordinateTransform};
use ville_middleware::{AgentDirectory, MqttSettings, TopicMap};
use ville_supervisor::BrokerSettings;
use ville_types::{Point2D, VilleError};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ville-gateway.toml";

/// Feet per simulation tile.  Field coordinates are in metres.
const TILE_FEET: f64 = 0.784;
const FEET_PER_METRE: f64 = 3.281;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub topics: TopicMap,

    #[serde(default)]
    pub gateway: GatewaySection,

    /// Simulation → field frame mapping.
    #[serde(default = "default_transform")]
    pub transform: AffineTransformConfig,

    /// Backend persona name → field agent id.
    #[serde(default = "default_agents")]
    pub agents: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    /// Largest MQTT packet accepted or sent, in bytes.
    pub max_packet_bytes: usize,
    /// Launch and stop a local broker process around the gateway.
    pub manage: bool,
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub probe_args: Vec<String>,
    pub probe_ok_codes: Vec<i32>,
    pub startup_grace_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_timeout_ms: Option<u64>,
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Maze name attached to every backend environment entry.
    pub maze: String,
    pub client_id: String,
}

fn default_transform() -> AffineTransformConfig {
    AffineTransformConfig {
        source_origin: Point2D::new(0.0, 0.0),
        target_origin: Point2D::new(61.1 / TILE_FEET, 11.36 / TILE_FEET),
        rotation_angle: 90.0,
        scale_factor: FEET_PER_METRE / TILE_FEET,
        reflect_x: false,
        reflect_y: true,
    }
}

fn default_agents() -> BTreeMap<String, String> {
    [
        ("Isabella Rodriguez", "Robot 1"),
        ("Klaus Mueller", "Robot 2"),
        ("Maria Lopez", "Robot 3"),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), id.to_string()))
    .collect()
}

impl Default for BrokerSection {
    fn default() -> Self {
        let supervised = BrokerSettings::default();
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keepalive_secs: 60,
            max_packet_bytes: MqttSettings::default().max_packet_size,
            manage: true,
            executable: supervised.executable,
            args: supervised.args,
            probe_args: supervised.probe_args,
            probe_ok_codes: supervised.probe_ok_codes,
            startup_grace_ms: 500,
            readiness_timeout_ms: Some(5_000),
            stop_timeout_ms: 5_000,
        }
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            maze: "the_ville".to_string(),
            client_id: "ville-gateway".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            topics: TopicMap::default(),
            gateway: GatewaySection::default(),
            transform: default_transform(),
            agents: default_agents(),
        }
    }
}

impl Config {
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.broker.host.clone(),
            port: self.broker.port,
            keepalive: Duration::from_secs(self.broker.keepalive_secs),
            client_id: self.gateway.client_id.clone(),
            max_packet_size: self.broker.max_packet_bytes,
            ..MqttSettings::default()
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        let b = &self.broker;
        BrokerSettings {
            executable: b.executable.clone(),
            args: b.args.clone(),
            probe_args: b.probe_args.clone(),
            probe_ok_codes: b.probe_ok_codes.clone(),
            host: b.host.clone(),
            port: b.port,
            startup_grace: Duration::from_millis(b.startup_grace_ms),
            readiness_timeout: b.readiness_timeout_ms.map(Duration::from_millis),
            stop_timeout: Duration::from_millis(b.stop_timeout_ms),
        }
    }

    pub fn build_transform(&self) -> Result<CoordinateTransform, VilleError> {
        CoordinateTransform::new(self.transform)
    }

    pub fn build_directory(&self) -> Result<AgentDirectory, VilleError> {
        AgentDirectory::new(self.agents.iter().map(|(name, id)| (name.as_str(), id.as_str())))
    }

    /// Check everything that would make `run` fail before any process is
    /// started.
    pub fn validate(&self) -> Result<(), VilleError> {
        self.topics.validate()?;
        self.build_transform()?;
        self.build_directory()?;
        if self.broker.max_packet_bytes == 0 {
            return Err(VilleError::Config("broker.max_packet_bytes must be positive".to_string()));
        }
        if self.gateway.client_id.is_empty() {
            return Err(VilleError::Config("gateway.client_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load the config from `path`, falling back to defaults when the file does
/// not exist.  Environment overrides are applied in both cases.
pub fn load_from(path: &Path) -> Result<Config, VilleError> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path).map_err(|e| {
            VilleError::Config(format!("Failed to read config at {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            VilleError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Fallback | Config field |
/// |---|---|---|
/// | `VILLE_BROKER_HOST` | `MQTT_BROKER_HOST` | `broker.host` |
/// | `VILLE_BROKER_PORT` | `MQTT_BROKER_PORT` | `broker.port` |
/// | `VILLE_KEEPALIVE_SECS` | `MQTT_KEEPALIVE` | `broker.keepalive_secs` |
/// | `VILLE_MAX_PACKET_BYTES` | | `broker.max_packet_bytes` |
/// | `VILLE_MANAGE_BROKER` | | `broker.manage` |
/// | `VILLE_MAZE` | | `gateway.maze` |
///
/// The `MQTT_*` names are the ones existing `.env` files use; a `VILLE_*`
/// variable wins when both are set.  Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |primary: &str, fallback: Option<&str>| {
        lookup(primary).or_else(|| fallback.and_then(&lookup))
    };

    if let Some(v) = var("VILLE_BROKER_HOST", Some("MQTT_BROKER_HOST")) {
        cfg.broker.host = v;
    }
    if let Some(port) = var("VILLE_BROKER_PORT", Some("MQTT_BROKER_PORT"))
        .and_then(|v| v.trim().parse::<u16>().ok())
    {
        cfg.broker.port = port;
    }
    if let Some(secs) = var("VILLE_KEEPALIVE_SECS", Some("MQTT_KEEPALIVE"))
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        cfg.broker.keepalive_secs = secs;
    }
    if let Some(bytes) =
        var("VILLE_MAX_PACKET_BYTES", None).and_then(|v| v.trim().parse::<usize>().ok())
    {
        cfg.broker.max_packet_bytes = bytes;
    }
    if let Some(manage) = var("VILLE_MANAGE_BROKER", None).and_then(|v| parse_flag(&v)) {
        cfg.broker.manage = manage;
    }
    if let Some(v) = var("VILLE_MAZE", None) {
        cfg.gateway.maze = v;
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Write `cfg` to `path`, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), VilleError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| VilleError::Config(format!("Failed to create config directory: {e}")))?;
    }
    let raw = to_toml(cfg)?;
    fs::write(path, raw)
        .map_err(|e| VilleError::Config(format!("Failed to write config at {}: {e}", path.display())))
}

pub fn to_toml(cfg: &Config) -> Result<String, VilleError> {
    toml::to_string_pretty(cfg)
        .map_err(|e| VilleError::Config(format!("Failed to serialize config: {e}")))
}
