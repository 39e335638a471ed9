//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CameradarSettings::default()`]
//! 2. If `~/.cameradar/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CAMERADAR_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CameradarSettings;

/// `~/.cameradar`, falling back to `/tmp/.cameradar` without a home.
pub fn cameradar_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cameradar")
}

/// Resolve the path to the settings file (`~/.cameradar/settings.json`).
pub fn settings_path() -> PathBuf {
    cameradar_home().join("settings.json")
}

/// Absolute paths pass through; relative ones are joined onto `base`.
pub fn resolve_home_path(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CameradarSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CameradarSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<CameradarSettings> {
    let defaults = serde_json::to_value(CameradarSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Reject combinations no scan could run with.
fn validate(settings: &CameradarSettings) -> Result<()> {
    if settings.scan.default_ports.is_empty() {
        return Err(SettingsError::InvalidValue(
            "scan.defaultPorts must not be empty".into(),
        ));
    }
    if settings.scan.default_ports.contains(&0) {
        return Err(SettingsError::InvalidValue(
            "scan.defaultPorts must not contain port 0".into(),
        ));
    }
    if settings.scan.speed > 5 {
        return Err(SettingsError::InvalidValue(format!(
            "scan.speed {} is outside 0-5",
            settings.scan.speed
        )));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be at least 1".into(),
        ));
    }
    let server = &settings.server;
    if server.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalMs must be at least 1".into(),
        ));
    }
    if server.drain_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "server.drainTimeoutMs must be at least 1".into(),
        ));
    }
    if server.client_timeout_ms <= server.heartbeat_interval_ms {
        return Err(SettingsError::InvalidValue(format!(
            "server.clientTimeoutMs {} must exceed server.heartbeatIntervalMs {}",
            server.client_timeout_ms, server.heartbeat_interval_ms
        )));
    }
    Ok(())
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored, leaving the file/default value.
pub fn apply_env_overrides(settings: &mut CameradarSettings) {
    if let Some(v) = read_env_string("CAMERADAR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("CAMERADAR_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("CAMERADAR_SEND_QUEUE", 1, 65_536) {
        settings.server.send_queue_capacity = v;
    }
    if let Some(v) = read_env_ports("CAMERADAR_PORTS") {
        settings.scan.default_ports = v;
    }
    if let Some(v) = read_env_u64("CAMERADAR_SPEED", 0, 5) {
        settings.scan.speed = v as u8;
    }
    if let Some(v) = read_env_u64("CAMERADAR_TIMEOUT", 1, 600_000) {
        settings.scan.attack_timeout_ms = v;
    }
    if let Some(v) = read_env_bool("CAMERADAR_LOGS") {
        settings.scan.enable_logs = v;
    }
    if let Some(v) = read_env_string("CAMERADAR_CUSTOM_ROUTES") {
        settings.dictionaries.routes = v;
    }
    if let Some(v) = read_env_string("CAMERADAR_CUSTOM_CREDENTIALS") {
        settings.dictionaries.credentials = v;
    }
    if let Some(v) = read_env_string("CAMERADAR_ENGINE") {
        settings.engine.program = v;
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a port list such as `554,8554` or `554,8000-8010`.
///
/// Entries are comma or space separated; `a-b` expands to an inclusive range.
/// Duplicates are removed and the result is sorted.
pub fn parse_port_list(val: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for entry in val.split([',', ' ']).map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_port(lo)?;
                let hi = parse_port(hi)?;
                if lo > hi {
                    return Err(SettingsError::InvalidValue(format!(
                        "port range {entry} is reversed"
                    )));
                }
                ports.extend(lo..=hi);
            }
            None => ports.push(parse_port(entry)?),
        }
    }
    if ports.is_empty() {
        return Err(SettingsError::InvalidValue("port list is empty".into()));
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

fn parse_port(val: &str) -> Result<u16> {
    parse_u16_range(val.trim(), 1, 65535)
        .ok_or_else(|| SettingsError::InvalidValue(format!("invalid port {val:?}")))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_ports(name: &str) -> Option<Vec<u16>> {
    let val = read_env_string(name)?;
    match parse_port_list(&val) {
        Ok(ports) => Some(ports),
        Err(e) => {
            tracing::warn!(key = name, value = %val, error = %e, "invalid port list env var, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 7000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"ports": [554, 8554]});
        let source = serde_json::json!({"ports": [80]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["ports"], serde_json::json!([80]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    #[test]
    fn merge_empty_source() {
        let target = serde_json::json!({"a": 1, "b": {"c": 2}});
        let merged = deep_merge(target.clone(), serde_json::json!({}));
        assert_eq!(merged, target);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.scan.default_ports, vec![554, 8554]);
    }

    #[test]
    fn load_partial_json_overrides() {
        let (_dir, path) = write_settings(
            r#"{"server": {"port": 9090}, "scan": {"defaultPorts": [554], "enableLogs": true}}"#,
        );
        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.scan.default_ports, vec![554]);
        assert!(settings.scan.enable_logs);
        assert_eq!(settings.scan.speed, 4);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let (_dir, path) = write_settings("not valid json");
        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let (_dir, path) = write_settings(r#"{"server": {"port": "seven"}}"#);
        assert!(matches!(
            load_file_layer(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    #[test]
    fn validate_rejects_empty_default_ports() {
        let (_dir, path) = write_settings(r#"{"scan": {"defaultPorts": []}}"#);
        let settings = load_file_layer(&path).unwrap();
        assert!(matches!(
            validate(&settings).unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    #[test]
    fn validate_rejects_fast_speed() {
        let mut settings = CameradarSettings::default();
        settings.scan.speed = 9;
        assert!(validate(&settings).is_err());
        settings.scan.speed = 5;
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn load_module_log_levels() {
        let (_dir, path) =
            write_settings(r#"{"logging": {"modules": {"cameradar_server": "debug"}}}"#);
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.logging.level, "info");
        assert_eq!(
            settings.logging.modules.get("cameradar_server").map(String::as_str),
            Some("debug")
        );
    }

    #[test]
    fn validate_rejects_zero_heartbeat() {
        let (_dir, path) = write_settings(r#"{"server": {"heartbeatIntervalMs": 0}}"#);
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("heartbeatIntervalMs"), "got: {err}");
    }

    #[test]
    fn validate_rejects_zero_drain_timeout() {
        let mut settings = CameradarSettings::default();
        settings.server.drain_timeout_ms = 0;
        assert!(matches!(
            validate(&settings).unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    #[test]
    fn validate_requires_client_timeout_above_heartbeat() {
        let mut settings = CameradarSettings::default();
        settings.server.heartbeat_interval_ms = 30_000;
        settings.server.client_timeout_ms = 30_000;
        assert!(validate(&settings).is_err());
        settings.server.client_timeout_ms = 30_001;
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let base = Path::new("/home/u/.cameradar");
        assert_eq!(
            resolve_home_path(base, "dictionaries/routes"),
            PathBuf::from("/home/u/.cameradar/dictionaries/routes")
        );
        assert_eq!(
            resolve_home_path(base, "/etc/routes"),
            PathBuf::from("/etc/routes")
        );
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("5", 0, 5), Some(5));
        assert_eq!(parse_u64_range("6", 0, 5), None);
        assert_eq!(parse_usize_range("abc", 1, 10), None);
    }

    #[test]
    fn port_list_single_and_csv() {
        assert_eq!(parse_port_list("554").unwrap(), vec![554]);
        assert_eq!(parse_port_list("8554, 554").unwrap(), vec![554, 8554]);
        assert_eq!(parse_port_list("554 554 8554").unwrap(), vec![554, 8554]);
    }

    #[test]
    fn port_list_ranges() {
        assert_eq!(
            parse_port_list("554,8000-8002").unwrap(),
            vec![554, 8000, 8001, 8002]
        );
        assert!(parse_port_list("9000-8000").is_err());
    }

    #[test]
    fn port_list_rejects_bad_entries() {
        assert!(parse_port_list("").is_err());
        assert!(parse_port_list("0").is_err());
        assert!(parse_port_list("70000").is_err());
        assert!(parse_port_list("554,abc").is_err());
    }
}
