use tracing::Dispatch;
use trapsink::{ConfigError, SnmpVersion, TrapListenerConfig};

fn config(port: u16, version: &str, community: &[&str]) -> TrapListenerConfig {
    TrapListenerConfig {
        port,
        version: version.to_string(),
        community_strings: community.iter().map(|c| c.to_string()).collect(),
        ..TrapListenerConfig::default()
    }
}

fn logger() -> Dispatch {
    Dispatch::new(tracing_subscriber::registry())
}

#[test]
fn default_version_is_v2c() {
    let params = config(162, "", &["public"]).build_params(logger()).unwrap();

    assert_eq!(params.transport, "udp");
    assert_eq!(params.port, 162);
    assert_eq!(params.version, SnmpVersion::V2c);
}

#[test]
fn missing_port() {
    let err = config(0, "", &["public"]).build_params(logger()).unwrap_err();
    assert_eq!(err, ConfigError::MissingPort);
}

#[test]
fn v2c_alias() {
    let params = config(162, "2c", &["public"]).build_params(logger()).unwrap();
    assert_eq!(params.version, SnmpVersion::V2c);
}

#[test]
fn invalid_version() {
    let err = config(162, "42", &["public"]).build_params(logger()).unwrap_err();
    assert_eq!(err, ConfigError::UnsupportedVersion { version: "42".to_string() });
    assert!(err.to_string().contains("'42'"));
}

#[test]
fn v1_and_v3_not_supported() {
    for version in ["1", "3"] {
        let err = config(162, version, &["public"]).build_params(logger()).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedVersion { version: version.to_string() });
    }
}

#[test]
fn missing_community() {
    let err = config(162, "", &[]).build_params(logger()).unwrap_err();
    assert_eq!(err, ConfigError::MissingCommunity);
}

#[test]
fn community_is_not_carried_into_params() {
    let params = config(162, "2", &["public", "private"]).build_params(logger()).unwrap();
    assert!(params.community.is_empty());
}

#[test]
fn repeated_builds_agree() {
    let raw = config(1162, "2c", &["public"]);
    let first = raw.build_params(logger()).unwrap();
    let second = raw.build_params(logger()).unwrap();

    assert_eq!(first.transport, second.transport);
    assert_eq!(first.port, second.port);
    assert_eq!(first.version, second.version);
    assert_eq!(first.community, second.community);
}
