//! trapsink Library
//!
//! An SNMP v2c trap listener. Operator configuration is validated into
//! strictly typed listener parameters before any socket is opened, and
//! incoming datagrams are gated on version and community string.

pub mod config;
pub mod error;
pub mod snmp_listener;

pub use config::{Config, SnmpVersion, TrapListenerConfig, TrapListenerParams};
pub use error::ConfigError;
pub use snmp_listener::{PacketRejection, TrapListener, TrapPacket};
