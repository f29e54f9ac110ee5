//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TopicastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TOPICAST_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TopicastSettings;

/// Resolve the default settings path (`~/.topicast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".topicast").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TopicastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<TopicastSettings> {
    let defaults = serde_json::to_value(TopicastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TopicastSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TOPICAST_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut TopicastSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored, falling back to file/default.
pub fn apply_overrides_from(
    settings: &mut TopicastSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("TOPICAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("TOPICAST_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => warn!(key = "TOPICAST_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }

    let c = &mut settings.connections;
    for (name, slot) in [
        ("TOPICAST_HEARTBEAT_INTERVAL_MS", &mut c.heartbeat_interval_ms),
        ("TOPICAST_REAP_INTERVAL_MS", &mut c.reap_interval_ms),
        ("TOPICAST_STALE_THRESHOLD_MS", &mut c.stale_threshold_ms),
        ("TOPICAST_SEND_TIMEOUT_MS", &mut c.send_timeout_ms),
    ] {
        if let Some(v) = read(name) {
            match parse_u64_range(&v, 1, 86_400_000) {
                Some(ms) => *slot = ms,
                None => warn!(key = name, value = %v, "invalid duration env var, ignoring"),
            }
        }
    }
    if let Some(v) = read("TOPICAST_MAX_TOPICS") {
        match v.parse::<usize>() {
            Ok(0) => c.max_topics_per_connection = None,
            Ok(n) => c.max_topics_per_connection = Some(n),
            Err(_) => warn!(key = "TOPICAST_MAX_TOPICS", value = %v, "invalid usize env var, ignoring"),
        }
    }

    if let Some(v) = read("TOPICAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("TOPICAST_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "TOPICAST_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
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
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.connections.stale_threshold_ms, 600_000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"connections":{"heartbeatIntervalMs":5000},"logging":{"json":true}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.connections.heartbeat_interval_ms, 5000);
        assert_eq!(settings.connections.reap_interval_ms, 300_000);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn zero_interval_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connections":{"reapIntervalMs":0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::ZeroValue {
                field: "reapIntervalMs"
            }
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = TopicastSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("TOPICAST_PORT", "7000"),
                ("TOPICAST_STALE_THRESHOLD_MS", "60000"),
                ("TOPICAST_MAX_TOPICS", "16"),
                ("TOPICAST_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.connections.stale_threshold_ms, 60_000);
        assert_eq!(settings.connections.max_topics_per_connection, Some(16));
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut settings = TopicastSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("TOPICAST_PORT", "99999"),
                ("TOPICAST_HEARTBEAT_INTERVAL_MS", "0"),
                ("TOPICAST_LOG_JSON", "maybe"),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.connections.heartbeat_interval_ms, 30_000);
        assert!(!settings.logging.json);
    }

    #[test]
    fn max_topics_zero_means_unlimited() {
        let mut settings = TopicastSettings::default();
        settings.connections.max_topics_per_connection = Some(4);
        apply_overrides_from(&mut settings, env(&[("TOPICAST_MAX_TOPICS", "0")]));
        assert_eq!(settings.connections.max_topics_per_connection, None);
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
