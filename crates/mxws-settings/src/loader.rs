//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MxwsSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `MXWS_*` environment variable overrides
//!
//! Validation is left to the caller, once any later layers are applied.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::MxwsSettings;

/// Resolve the path to the settings file (`~/.mxws/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mxws").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults and invalid JSON is an error. The result
/// is not validated; call [`MxwsSettings::validate`] after applying any
/// further overrides.
pub fn load_settings_from_path(path: &Path) -> Result<MxwsSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<MxwsSettings> {
    let defaults = serde_json::to_value(MxwsSettings::default())?;

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

/// Apply environment variable overrides from the process environment.
pub fn apply_env_overrides(settings: &mut MxwsSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged and ignored (fall back to file/default)
pub fn apply_overrides_from<F>(settings: &mut MxwsSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MXWS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("MXWS_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.string("MXWS_UPSTREAM_URL") {
        settings.upstream.base_url = v;
    }
    if let Some(v) = env.u64("MXWS_SYNC_TIMEOUT_MS", 0, 3_600_000) {
        settings.upstream.sync_timeout_ms = v;
    }
    if let Some(v) = env.u64("MXWS_REQUEST_TIMEOUT_MS", 1000, 3_600_000) {
        settings.upstream.request_timeout_ms = v;
    }

    // ── WebSocket ───────────────────────────────────────────────────
    if let Some(v) = env.u64("MXWS_PING_INTERVAL_MS", 1000, 3_600_000) {
        settings.websocket.ping_interval_ms = v;
    }
    if let Some(v) = env.u64("MXWS_PONG_WAIT_MS", 1000, 3_600_000) {
        settings.websocket.pong_wait_ms = v;
    }
    if let Some(v) = env.u64("MXWS_WRITE_WAIT_MS", 100, 600_000) {
        settings.websocket.write_wait_ms = v;
    }
    if let Some(v) = env.usize("MXWS_MAX_MESSAGE_BYTES", 64, 16 * 1024 * 1024) {
        settings.websocket.max_message_bytes = v;
    }
    if let Some(v) = env.usize("MXWS_SEND_QUEUE_CAPACITY", 1, 65_536) {
        settings.websocket.send_queue_capacity = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MXWS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MXWS_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
