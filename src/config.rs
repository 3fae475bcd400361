// src/config.rs

use async_trait::async_trait;
use dashmap::DashMap;
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_RELAY_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_RELAY_PORT: u16 = 8000;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Key/value source the relay reads its settings from.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment, optionally seeded from a `.env` file.
/// Variables already set in the environment win over the file.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: Option<PathBuf>,
}

impl EnvConfigManager {
    pub fn new(env_file: Option<PathBuf>) -> Box<Self> {
        if let Some(path) = &env_file {
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => info!("Loaded .env from {}", path.display()),
                    Err(e) => warn!("could not parse {}: {}", path.display(), e),
                }
            } else {
                warn!("no .env at {}, using process environment only", path.display());
            }
        }
        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        match &self.env_file {
            Some(path) => format!("EnvConfigManager({})", path.display()),
            None => "EnvConfigManager".to_string(),
        }
    }
}

/// In-memory config, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn with(self: Box<Self>, key: &str, value: &str) -> Box<Self> {
        self.map.insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Where and as whom to connect to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
}

/// Effective relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub broker: BrokerSettings,
    /// `address:port` the WebSocket listener binds to.
    pub listen_addr: String,
    /// `None` disables the credential gate.
    pub web_password: Option<String>,
    pub reconnect_delay: Duration,
}

impl RelayConfig {
    /// Reads `MQTT_BROKER`, `MQTT_PORT`, `MQTT_USERNAME`, `MQTT_PASSWORD`,
    /// `MQTT_KEEP_ALIVE_SECS`, `WEB_PASSWORD`, `RELAY_ADDRESS`, `RELAY_PORT`
    /// and `RECONNECT_DELAY_SECS`.
    pub async fn load(cfg: &ConfigManager) -> Result<Self, ConfigError> {
        let host = non_empty(cfg.get("MQTT_BROKER").await)
            .ok_or_else(|| ConfigError::Missing("MQTT_BROKER".into()))?;
        let port = parse_or(cfg, "MQTT_PORT", DEFAULT_MQTT_PORT).await?;
        let keep_alive_secs = parse_or(cfg, "MQTT_KEEP_ALIVE_SECS", DEFAULT_KEEP_ALIVE_SECS).await?;
        if keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::Invalid {
                key: "MQTT_KEEP_ALIVE_SECS".into(),
                value: keep_alive_secs.to_string(),
            });
        }

        let address = non_empty(cfg.get("RELAY_ADDRESS").await)
            .unwrap_or_else(|| DEFAULT_RELAY_ADDRESS.to_string());
        let relay_port = parse_or(cfg, "RELAY_PORT", DEFAULT_RELAY_PORT).await?;
        let reconnect_secs = parse_or(cfg, "RECONNECT_DELAY_SECS", DEFAULT_RECONNECT_DELAY_SECS).await?;

        Ok(Self {
            broker: BrokerSettings {
                host,
                port,
                username: cfg.get("MQTT_USERNAME").await.unwrap_or_default(),
                password: cfg.get("MQTT_PASSWORD").await.unwrap_or_default(),
                keep_alive: Duration::from_secs(keep_alive_secs),
            },
            listen_addr: format!("{}:{}", address, relay_port),
            web_password: non_empty(cfg.get("WEB_PASSWORD").await),
            reconnect_delay: Duration::from_secs(reconnect_secs),
        })
    }

    /// Human readable summary with secrets masked.
    pub fn redacted(&self) -> String {
        let mask = |s: &str| if s.is_empty() { "<none>" } else { "******" };
        format!(
            "broker = {}:{}\nusername = {}\npassword = {}\nkeep_alive = {}s\nlisten = {}\nweb_password = {}\nreconnect_delay = {}s",
            self.broker.host,
            self.broker.port,
            if self.broker.username.is_empty() { "<anonymous>" } else { self.broker.username.as_str() },
            mask(&self.broker.password),
            self.broker.keep_alive.as_secs(),
            self.listen_addr,
            mask(self.web_password.as_deref().unwrap_or_default()),
            self.reconnect_delay.as_secs(),
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn parse_or<T: FromStr>(cfg: &ConfigManager, key: &str, default: T) -> Result<T, ConfigError> {
    match non_empty(cfg.get(key).await) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
