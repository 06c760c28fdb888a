//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `RELAY_*` environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Resolve the default settings path (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_settings_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RELAY_*` overrides read through `lookup`.
///
/// Out-of-range or unparsable values are ignored with a warning.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let number = |name: &str, min: u64, max: u64| {
        let val = string(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = number("RELAY_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = string("RELAY_PUBLIC_URL") {
        settings.server.public_url = Some(v);
    }

    // ── Processor ───────────────────────────────────────────────────
    if let Some(v) = string("RELAY_PROCESSOR_URL") {
        settings.processor.base_url = v;
    }
    if let Some(v) = string("RELAY_PROCESSOR_API_KEY") {
        settings.processor.api_key = Some(v);
    }

    // ── Bridge timing ───────────────────────────────────────────────
    if let Some(v) = number("RELAY_ARM_TIMEOUT_MS", 100, 600_000) {
        settings.bridge.arm_timeout_ms = v;
    }
    if let Some(v) = number("RELAY_POLL_INTERVAL_MS", 100, 600_000) {
        settings.bridge.poll_interval_ms = v;
    }
    if let Some(v) = number("RELAY_MAX_POLL_ATTEMPTS", 1, 1_000) {
        settings.bridge.max_poll_attempts = v as u32;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("RELAY_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => tracing::warn!(key = "RELAY_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Reject settings the bridge cannot run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    if settings.bridge.max_poll_attempts == 0 {
        return Err(SettingsError::InvalidValue(
            "bridge.maxPollAttempts must be at least 1".into(),
        ));
    }
    if settings.bridge.poll_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "bridge.pollIntervalMs must be positive".into(),
        ));
    }
    if !settings.server.webhook_path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.webhookPath must start with '/': {}",
            settings.server.webhook_path
        )));
    }
    if matches!(settings.server.webhook_path.as_str(), "/ws" | "/health") {
        return Err(SettingsError::InvalidValue(format!(
            "server.webhookPath collides with a built-in route: {}",
            settings.server.webhook_path
        )));
    }
    if settings.processor.base_url.is_empty() {
        return Err(SettingsError::InvalidValue("processor.baseUrl is empty".into()));
    }
    Ok(())
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
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
