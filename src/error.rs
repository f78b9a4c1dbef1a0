//! Error types for trap listener configuration

/// Reasons a listener configuration cannot be turned into listener parameters.
///
/// Checks run in a fixed order (port, version, community) and the first
/// failure is reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No port configured, or port set to zero.
    #[error("listener port is required")]
    MissingPort,

    /// The version token does not resolve to SNMP v2c.
    #[error("unsupported SNMP version '{version}': only v2c is supported")]
    UnsupportedVersion { version: String },

    /// SNMP v2c needs at least one community string.
    #[error("at least one community string must be configured for SNMP v2c")]
    MissingCommunity,
}
