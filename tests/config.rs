use std::time::Duration;

use assert_matches::assert_matches;

use kira_lab_notebook::config::{Config, ConfigLoader, DEFAULT_BASE_URL};
use kira_lab_notebook::error::KiraError;

#[test]
fn explicit_config_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kira-ln.json");
    std::fs::write(
        &path,
        r#"{"schema_version": 1, "base_url": "https://notebook.lab.org/api/", "timeout_secs": 5}"#,
    )
    .unwrap();

    let config: Config = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let resolved = ConfigLoader::resolve_config(config, None).unwrap();

    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.base_url, "https://notebook.lab.org/api");
    assert_eq!(resolved.timeout, Duration::from_secs(5));
    assert!(resolved.user_agent.starts_with("kira-ln/"));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();

    assert_matches!(err, KiraError::ConfigRead(p) if p == path);
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kira-ln.json");
    std::fs::write(&path, "{ base_url: nope").unwrap();

    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();

    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn defaults_apply_to_missing_fields() {
    let config: Config = serde_json::from_str("{}").unwrap();

    let resolved = ConfigLoader::resolve_config(config, None).unwrap();

    assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
    assert_eq!(resolved.timeout, Duration::from_secs(30));
}

#[test]
fn non_http_base_url_is_rejected() {
    let config = Config {
        base_url: Some("ftp://notebook.lab.org".to_string()),
        ..Config::default()
    };

    assert_matches!(
        ConfigLoader::resolve_config(config, None),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn zero_timeout_is_rejected() {
    let config = Config {
        timeout_secs: Some(0),
        ..Config::default()
    };

    assert_matches!(
        ConfigLoader::resolve_config(config, None),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn blank_env_override_is_ignored() {
    let config = Config {
        base_url: Some("http://lab.internal:5000/api".to_string()),
        ..Config::default()
    };

    let resolved = ConfigLoader::resolve_config(config, Some("  ")).unwrap();

    assert_eq!(resolved.base_url, "http://lab.internal:5000/api");
}
