//! Configuration management for trapsink
//!
//! Loads the JSON configuration file and turns the listener section into
//! validated, protocol-ready listener parameters.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, Dispatch, Level};
use tracing_appender::rolling::Rotation;

/// The only transport the listener binds.
pub const UDP_TRANSPORT: &str = "udp";

/// Version tokens an operator may write, and what they resolve to.
/// Matching is exact; "2C" is not an alias.
const VERSION_ALIASES: &[(&str, SnmpVersion)] = &[
    ("", SnmpVersion::V2c),
    ("2c", SnmpVersion::V2c),
    ("2", SnmpVersion::V2c),
    ("1", SnmpVersion::V1),
    ("3", SnmpVersion::V3),
];

const LOG_LEVELS: &[(&str, Level)] = &[
    ("trace", Level::TRACE),
    ("debug", Level::DEBUG),
    ("info", Level::INFO),
    ("warn", Level::WARN),
    ("error", Level::ERROR),
];

const ROTATION_STRATEGIES: &[(&str, Rotation)] = &[
    ("daily", Rotation::DAILY),
    ("hourly", Rotation::HOURLY),
    ("never", Rotation::NEVER),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listener: TrapListenerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings as written by the operator. Nothing here is trusted
/// until [`TrapListenerConfig::build_params`] accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapListenerConfig {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub community_strings: Vec<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

/// Parameters handed to the listener once the configuration is accepted.
///
/// `transport` is always [`UDP_TRANSPORT`], `version` is always
/// [`SnmpVersion::V2c`] and `community` is always empty: the listener checks
/// incoming communities against the raw configuration instead.
#[derive(Debug, Clone)]
pub struct TrapListenerParams {
    pub transport: &'static str,
    pub port: u16,
    pub version: SnmpVersion,
    pub logger: Dispatch,
    pub community: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_console_output")]
    pub console_output: bool,
    #[serde(default)]
    pub file_output: Option<String>,
    #[serde(default = "default_rotation_strategy")]
    pub rotation_strategy: String,
}

fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_max_packet_size() -> usize { 8192 }
fn default_log_level() -> String { "info".to_string() }
fn default_console_output() -> bool { true }
fn default_rotation_strategy() -> String { "daily".to_string() }

impl Default for TrapListenerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            version: String::new(),
            community_strings: Vec::new(),
            bind_address: default_bind_address(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console_output: default_console_output(),
            file_output: None,
            rotation_strategy: default_rotation_strategy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: TrapListenerConfig {
                port: 162,
                version: "2c".to_string(),
                community_strings: vec!["public".to_string()],
                ..TrapListenerConfig::default()
            },
            logging: LoggingConfig {
                file_output: Some("./trapsink.log".to_string()),
                ..LoggingConfig::default()
            },
        }
    }
}

impl SnmpVersion {
    /// Map the version INTEGER of an SNMP message header.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::V1),
            1 => Some(Self::V2c),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2c => "v2c",
            Self::V3 => "v3",
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up an operator-supplied version token. `None` for unknown tokens.
fn resolve_version(raw: &str) -> Option<SnmpVersion> {
    VERSION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == raw)
        .map(|(_, version)| *version)
}

impl TrapListenerConfig {
    /// Validate this configuration and build the listener parameters.
    ///
    /// `logger` is embedded in the result so the listener logs through the
    /// dispatcher the caller chose.
    pub fn build_params(&self, logger: Dispatch) -> Result<TrapListenerParams, ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::MissingPort);
        }

        let version = match resolve_version(&self.version) {
            Some(SnmpVersion::V2c) => SnmpVersion::V2c,
            Some(SnmpVersion::V1) | Some(SnmpVersion::V3) | None => {
                return Err(ConfigError::UnsupportedVersion { version: self.version.clone() });
            }
        };

        // v2c authenticates by community string alone
        if self.community_strings.is_empty() {
            return Err(ConfigError::MissingCommunity);
        }

        debug!("Built listener parameters: {}/{} ({})", UDP_TRANSPORT, self.port, version);

        Ok(TrapListenerParams {
            transport: UDP_TRANSPORT,
            port: self.port,
            version,
            logger,
            community: Vec::new(),
        })
    }

    /// Whether an incoming community string is one of the configured ones.
    pub fn accepts_community(&self, community: &str) -> bool {
        self.community_strings.iter().any(|c| c == community)
    }
}

impl LoggingConfig {
    /// The configured level, or `None` if it is not one of the known names.
    pub fn tracing_level(&self) -> Option<Level> {
        LOG_LEVELS
            .iter()
            .find(|(name, _)| *name == self.level)
            .map(|(_, level)| *level)
    }

    pub fn rotation(&self) -> Option<Rotation> {
        ROTATION_STRATEGIES
            .iter()
            .find(|(name, _)| *name == self.rotation_strategy)
            .map(|(_, rotation)| rotation.clone())
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .context("Failed to read configuration file")?;

        let config: Config = serde_json::from_str(&content)
            .context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialise configuration")?;

        tokio::fs::write(path.as_ref(), content)
            .await
            .context("Failed to write configuration file")?;

        Ok(())
    }

    /// Validate the whole configuration, including the parts the listener
    /// parameters do not carry.
    pub fn validate(&self) -> Result<()> {
        self.listener
            .build_params(Dispatch::none())
            .context("Invalid listener configuration")?;

        if self.listener.bind_address.parse::<IpAddr>().is_err() {
            anyhow::bail!("Invalid bind address: {}", self.listener.bind_address);
        }

        if self.listener.max_packet_size == 0 {
            anyhow::bail!("max_packet_size must be greater than zero");
        }

        if self.logging.tracing_level().is_none() {
            anyhow::bail!("Unknown log level: {}", self.logging.level);
        }

        if self.logging.rotation().is_none() {
            anyhow::bail!("Unknown rotation strategy: {}", self.logging.rotation_strategy);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(port: u16, version: &str, community: &[&str]) -> TrapListenerConfig {
        TrapListenerConfig {
            port,
            version: version.to_string(),
            community_strings: community.iter().map(|c| c.to_string()).collect(),
            ..TrapListenerConfig::default()
        }
    }

    #[test]
    fn test_common_params() {
        let params = listener(162, "", &["public"]).build_params(Dispatch::none()).unwrap();

        assert_eq!(params.transport, "udp");
        assert_eq!(params.port, 162);
        assert_eq!(params.version, SnmpVersion::V2c);
    }

    #[test]
    fn test_port_required() {
        let err = TrapListenerConfig::default().build_params(Dispatch::none()).unwrap_err();
        assert_eq!(err, ConfigError::MissingPort);
    }

    #[test]
    fn test_port_checked_before_version_and_community() {
        let err = listener(0, "42", &[]).build_params(Dispatch::none()).unwrap_err();
        assert_eq!(err, ConfigError::MissingPort);
    }

    #[test]
    fn test_version_aliases() {
        for alias in ["", "2c", "2"] {
            let params = listener(162, alias, &["public"])
                .build_params(Dispatch::none())
                .unwrap();
            assert_eq!(params.version, SnmpVersion::V2c, "alias {:?}", alias);
        }
    }

    #[test]
    fn test_unsupported_versions() {
        for token in ["1", "3", "42", "2C", "v2c", " 2c"] {
            let err = listener(162, token, &["public"])
                .build_params(Dispatch::none())
                .unwrap_err();
            assert_eq!(err, ConfigError::UnsupportedVersion { version: token.to_string() });
        }
    }

    #[test]
    fn test_version_checked_before_community() {
        let err = listener(162, "3", &[]).build_params(Dispatch::none()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_community_required() {
        let err = listener(162, "2c", &[]).build_params(Dispatch::none()).unwrap_err();
        assert_eq!(err, ConfigError::MissingCommunity);
    }

    #[test]
    fn test_community_not_copied() {
        let params = listener(162, "", &["public", "private"])
            .build_params(Dispatch::none())
            .unwrap();
        assert!(params.community.is_empty());
    }

    #[test]
    fn test_empty_community_entry_is_accepted() {
        assert!(listener(162, "", &[""]).build_params(Dispatch::none()).is_ok());
    }

    #[test]
    fn test_accepts_community() {
        let config = listener(162, "", &["public", "ops"]);
        assert!(config.accepts_community("ops"));
        assert!(!config.accepts_community("Public"));
    }

    #[test]
    fn test_listener_defaults_from_json() {
        let config: Config = serde_json::from_str(
            r#"{ "listener": { "port": 1162, "community_strings": ["public"] } }"#,
        )
        .unwrap();

        assert_eq!(config.listener.version, "");
        assert_eq!(config.listener.bind_address, "0.0.0.0");
        assert_eq!(config.listener.max_packet_size, 8192);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_out_of_range_fails_to_parse() {
        let parsed: std::result::Result<Config, _> =
            serde_json::from_str(r#"{ "listener": { "port": 70000 } }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bind_address() {
        let mut config = Config::default();
        config.listener.bind_address = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_surfaces_config_error() {
        let mut config = Config::default();
        config.listener.version = "1".to_string();

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnsupportedVersion { version: "1".to_string() })
        );
    }

    #[test]
    fn test_resolve_version_table() {
        assert_eq!(resolve_version("2"), Some(SnmpVersion::V2c));
        assert_eq!(resolve_version("1"), Some(SnmpVersion::V1));
        assert_eq!(resolve_version("3"), Some(SnmpVersion::V3));
        assert_eq!(resolve_version("2C"), None);
    }

    #[test]
    fn test_logging_lookups() {
        let logging = LoggingConfig {
            level: "warn".to_string(),
            rotation_strategy: "hourly".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(logging.tracing_level(), Some(Level::WARN));
        assert_eq!(logging.rotation(), Some(Rotation::HOURLY));
    }

    #[test]
    fn test_validate_rejects_unknown_logging_values() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.rotation_strategy = "size".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        Config::default().save_to_file(&path).await.unwrap();
        let loaded = Config::load_from_file(&path).await.unwrap();

        assert_eq!(loaded.listener, Config::default().listener);
        assert!(loaded.validate().is_ok());
    }
}
