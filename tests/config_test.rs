use std::collections::HashMap;
use std::time::Duration;

use worklock::config::Config;
use worklock::config::lanes;
use worklock::error::Error;
use worklock::store::StoreUrl;

fn config_from(vars: &[(&str, &str)]) -> worklock::Result<Config> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_vars(|name| vars.get(name).cloned())
}

#[test]
fn defaults_apply_when_nothing_is_set() {
    let config = config_from(&[]).unwrap();
    assert_eq!(config.timeout, None);
    assert_eq!(config.log_step, Some(1));
    assert!(config.mark_as_done);
    assert_eq!(config.log_level, "info");
    assert!(config.otel_endpoint.is_none());
    assert!(matches!(config.store().unwrap(), StoreUrl::Sqlite(_)));
}

#[test]
fn variables_are_parsed() {
    let config = config_from(&[
        ("WORKLOCK_STORE", "memory:"),
        ("WORKLOCK_TIMEOUT", "1.5"),
        ("WORKLOCK_LOG_STEP", "0"),
        ("WORKLOCK_MARK_AS_DONE", "false"),
        ("OTEL_ENDPOINT", "http://localhost:4317"),
    ])
    .unwrap();

    assert!(matches!(config.store().unwrap(), StoreUrl::Memory));
    let locker = config.locker_config();
    assert_eq!(locker.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(locker.log_step, None);
    assert!(!locker.mark_as_done);
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
}

#[test]
fn empty_values_count_as_unset() {
    let config = config_from(&[("WORKLOCK_TIMEOUT", ""), ("LOG_LEVEL", "  ")]).unwrap();
    assert_eq!(config.timeout, None);
    assert_eq!(config.log_level, "info");
}

#[test]
fn malformed_values_fail_fast() {
    assert!(matches!(
        config_from(&[("WORKLOCK_TIMEOUT", "soon")]),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        config_from(&[("WORKLOCK_MARK_AS_DONE", "perhaps")]),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        config_from(&[("WORKLOCK_LOG_STEP", "-2")]),
        Err(Error::Config(_))
    ));
}

#[test]
fn store_url_is_not_printed() {
    let config = config_from(&[("WORKLOCK_STORE", "postgres://u:hunter2@db/locks")]).unwrap();
    assert!(!format!("{config:?}").contains("hunter2"));
}

#[test]
fn lane_files_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanes.toml");
    std::fs::write(
        &path,
        r#"
[[lane]]
name = "ingest"
items = ["a", "b"]

[[lane]]
items = ["c"]
"#,
    )
    .unwrap();

    let loaded = lanes::load(&path).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].name.as_deref(), Some("ingest"));
    assert_eq!(loaded[1].items, vec!["c".to_string()]);
}
