//! Config file loading against real files on disk

use std::io::Write;

use dbrelay_core::{ConfigError, RelayConfig};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn partial_file_keeps_defaults() {
    let file = write_config(
        r#"
database_url = "postgres://app:pw@db/project1"

[relay]
reconnect_backoff_ms = 250
"#,
    );

    let config = RelayConfig::load_with(Some(file.path()), no_env).unwrap();
    assert_eq!(config.database_url().unwrap(), "postgres://app:pw@db/project1");
    assert_eq!(config.relay.reconnect_backoff_ms, 250);
    assert_eq!(config.relay.channel, "db_changes");
    assert_eq!(config.bind_addr.port(), 8000);
}

#[test]
fn environment_overrides_file() {
    let file = write_config(
        r#"
bind_addr = "127.0.0.1:9000"

[relay]
group = "from_file"
"#,
    );

    let config = RelayConfig::load_with(Some(file.path()), |var| match var {
        "DBRELAY_GROUP" => Some("from_env".to_string()),
        "DBRELAY_BIND" => Some("0.0.0.0:7000".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.relay.group, "from_env");
    assert_eq!(config.bind_addr.port(), 7000);
}

#[test]
fn unknown_keys_are_rejected() {
    let file = write_config("listen_channel = \"oops\"\n");
    let err = RelayConfig::load_with(Some(file.path()), no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn invalid_values_fail_validation() {
    let file = write_config("[relay]\nws_path = \"ws/changes\"\n");
    let err = RelayConfig::load_with(Some(file.path()), no_env).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "relay.ws_path",
            ..
        }
    ));
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = RelayConfig::load_with(Some(&path), no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
