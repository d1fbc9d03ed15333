//! Agent configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use warda_db::DbRuntimeSettings;

/// Top-level agent process configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// The agent this process serves.
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Network configuration for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warda_config=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Identity of the served agent and the record provisioned for it.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Also the agent's participant name in the room.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Participant identity the agent publishes under.
    #[serde(default = "default_identity")]
    pub identity: String,

    /// System message seeded into a freshly provisioned record.
    #[serde(default = "default_system_message")]
    pub system_message: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "warda.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_agent_id() -> String {
    "warda".to_string()
}

fn default_agent_name() -> String {
    "Warda".to_string()
}

fn default_identity() -> String {
    "warda_agent".to_string()
}

fn default_system_message() -> String {
    "You are a helpful assistant.Your name is Warda.".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            agent_name: default_agent_name(),
            identity: default_identity(),
            system_message: default_system_message(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies `WARDA_*` environment overrides.
///
/// | Variable | Overrides |
/// |----------|-----------|
/// | `WARDA_HOST` | `server.host` |
/// | `WARDA_PORT` | `server.port` |
/// | `WARDA_DB_PATH` | `database.path` |
/// | `WARDA_DB_BUSY_TIMEOUT_MS` | `database.busy_timeout_ms` |
/// | `WARDA_DB_POOL_MAX_SIZE` | `database.pool_max_size` |
/// | `WARDA_LOG_LEVEL` | `logging.level` |
/// | `WARDA_LOG_JSON` | `logging.json` ("true" or "1" to enable) |
/// | `WARDA_AGENT_ID` | `agent.agent_id` |
/// | `WARDA_AGENT_NAME` | `agent.agent_name` |
/// | `WARDA_AGENT_IDENTITY` | `agent.identity` |
/// | `WARDA_SYSTEM_MESSAGE` | `agent.system_message` |
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies overrides looked up by variable name. Unparseable values are
/// ignored.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("WARDA_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("WARDA_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("WARDA_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(timeout) = var("WARDA_DB_BUSY_TIMEOUT_MS") {
        if let Ok(parsed) = timeout.parse() {
            config.database.busy_timeout_ms = parsed;
        }
    }
    if let Some(size) = var("WARDA_DB_POOL_MAX_SIZE") {
        if let Ok(parsed) = size.parse() {
            config.database.pool_max_size = parsed;
        }
    }
    if let Some(level) = var("WARDA_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("WARDA_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(agent_id) = var("WARDA_AGENT_ID") {
        config.agent.agent_id = agent_id;
    }
    if let Some(name) = var("WARDA_AGENT_NAME") {
        config.agent.agent_name = name;
    }
    if let Some(identity) = var("WARDA_AGENT_IDENTITY") {
        config.agent.identity = identity;
    }
    if let Some(message) = var("WARDA_SYSTEM_MESSAGE") {
        config.agent.system_message = message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_without_a_file() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.database.path, "warda.db");
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.agent.agent_id, "warda");
        assert_eq!(config.agent.identity, "warda_agent");
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).expect("defaults");
        assert_eq!(config.agent.agent_name, "Warda");
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[server]\nport = 8088\n\n[agent]\nagent_name = \"Nova\"\n\n[database]\npool_max_size = 2"
        )
        .expect("write");

        let config = load_config(file.path().to_str()).expect("valid toml");
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.agent.agent_name, "Nova");
        assert_eq!(config.agent.agent_id, "warda");
        assert_eq!(config.database.runtime_settings().pool_max_size, 2);
        assert_eq!(config.database.runtime_settings().busy_timeout_ms, 5_000);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[server\nport = ").expect("write");
        assert!(matches!(
            load_config(file.path().to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_replace_values_and_skip_garbage() {
        let vars: HashMap<&str, &str> = [
            ("WARDA_PORT", "9000"),
            ("WARDA_HOST", "not-an-ip"),
            ("WARDA_LOG_JSON", "1"),
            ("WARDA_AGENT_ID", "agent-7"),
            ("WARDA_SYSTEM_MESSAGE", "Be brief."),
            ("WARDA_DB_POOL_MAX_SIZE", "many"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert!(config.logging.json);
        assert_eq!(config.agent.agent_id, "agent-7");
        assert_eq!(config.agent.system_message, "Be brief.");
        assert_eq!(config.database.pool_max_size, 8);
    }
}
