//! Configuration file tests

use reltest_cli::config::{Config, Profile};
use std::fs;
use tempfile::TempDir;

fn path_str(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert!(config.url.is_none());
    assert!(config.api_key.is_none());
    assert!(config.engine.is_none());
    assert!(config.profiles.is_empty());
    assert!(config.default_profile.is_none());
}

#[test]
fn test_config_load_nonexistent() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load(Some(&path_str(&temp_dir, "missing.toml"))).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_save_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = path_str(&temp_dir, "nested/config.toml");

    let mut config = Config {
        url: Some("http://localhost:8080".to_string()),
        api_key: Some("test-key".to_string()),
        pool_size: Some(3),
        ..Default::default()
    };
    config.set_profile(
        "ci",
        Profile {
            url: "https://ci.example.com".to_string(),
            engine: Some("ci-engine".to_string()),
            ..Default::default()
        },
    );

    config.save(Some(&path)).unwrap();
    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_config_parses_hand_written_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = path_str(&temp_dir, "config.toml");
    fs::write(
        &path,
        r#"
url = "http://local:8080"
engine_size = "M"
default_profile = "ci"

[profiles.ci]
url = "https://ci.example.com"
api_key = "ci-key"
pool_size = 4
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.engine_size.as_deref(), Some("M"));
    assert_eq!(config.get_profile("ci").unwrap().pool_size, Some(4));
}

#[test]
fn test_resolve_profile_overrides_top_level() {
    let mut config = Config {
        url: Some("http://local:8080".to_string()),
        api_key: Some("top-key".to_string()),
        engine_size: Some("M".to_string()),
        ..Default::default()
    };
    config.set_profile(
        "ci",
        Profile {
            url: "https://ci.example.com".to_string(),
            pool_size: Some(4),
            ..Default::default()
        },
    );

    let top = config.resolve(None).unwrap();
    assert_eq!(top.url.as_deref(), Some("http://local:8080"));
    assert_eq!(top.pool_size, None);

    let ci = config.resolve(Some("ci")).unwrap();
    assert_eq!(ci.url.as_deref(), Some("https://ci.example.com"));
    assert_eq!(ci.api_key.as_deref(), Some("top-key"));
    assert_eq!(ci.engine_size.as_deref(), Some("M"));
    assert_eq!(ci.pool_size, Some(4));

    config.default_profile = Some("ci".to_string());
    assert_eq!(config.resolve(None).unwrap(), ci);
}

#[test]
fn test_resolve_unknown_profile_fails() {
    let config = Config::default();
    let err = config.resolve(Some("nope")).unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[test]
fn test_remove_profile_clears_default() {
    let mut config = Config::default();
    config.set_profile("a", Profile::default());
    config.set_profile("b", Profile::default());
    config.default_profile = Some("a".to_string());

    assert_eq!(config.list_profiles(), vec!["a", "b"]);
    assert!(config.remove_profile("a"));
    assert!(!config.remove_profile("a"));
    assert!(config.default_profile.is_none());
    assert_eq!(config.list_profiles(), vec!["b"]);
}
