use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::connection_registry::RegistryOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

/// Registry limits and timings. Durations are in seconds unless suffixed.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
    #[serde(default = "default_warn_percent")]
    pub memory_warn_percent: f32,
    #[serde(default = "default_warn_percent")]
    pub cpu_warn_percent: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_max_total_connections() -> usize {
    100
}

fn default_max_connections_per_user() -> usize {
    3
}

fn default_sweep_interval() -> u64 {
    60 // 1 minute
}

fn default_connection_timeout() -> u64 {
    300 // 5 minutes
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_monitor_enabled() -> bool {
    true
}

fn default_warn_percent() -> f32 {
    80.0
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_total_connections == 0 {
            return Err("registry.max_total_connections must be greater than 0".into());
        }
        if self.max_connections_per_user == 0 {
            return Err("registry.max_connections_per_user must be greater than 0".into());
        }
        if self.connection_timeout == 0 {
            return Err("registry.connection_timeout must be greater than 0".into());
        }
        if self.sweep_interval == 0 || self.sweep_interval >= self.connection_timeout {
            return Err(format!(
                "registry.sweep_interval ({}s) must be non-zero and shorter than registry.connection_timeout ({}s)",
                self.sweep_interval, self.connection_timeout
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err("registry.send_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    pub fn options(&self) -> RegistryOptions {
        RegistryOptions {
            max_total_connections: self.max_total_connections,
            max_connections_per_user: self.max_connections_per_user,
            sweep_interval: Duration::from_secs(self.sweep_interval),
            connection_timeout: Duration::from_secs(self.connection_timeout),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("registry.max_total_connections", 100)?
            .set_default("registry.max_connections_per_user", 3)?
            .set_default("registry.sweep_interval", 60)?
            .set_default("registry.connection_timeout", 300)?
            .set_default("registry.send_timeout_ms", 5000)?
            .set_default("monitor.enabled", true)?
            .set_default("logging.format", "pretty")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // GATEWAY__REGISTRY__MAX_TOTAL_CONNECTIONS, GATEWAY__JWT__SECRET, ...
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.registry.validate().map_err(ConfigError::Message)?;
        Ok(settings)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_total_connections: default_max_total_connections(),
            max_connections_per_user: default_max_connections_per_user(),
            sweep_interval: default_sweep_interval(),
            connection_timeout: default_connection_timeout(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            memory_warn_percent: default_warn_percent(),
            cpu_warn_percent: default_warn_percent(),
        }
    }
}
