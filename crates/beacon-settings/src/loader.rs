//! Settings loading: compiled defaults, then `settings.json`, then `BEACON_*`
//! environment overrides, then validation.
//!
//! Nothing here logs. The loader runs before a subscriber exists, so
//! rejected overrides are returned in [`LoadedSettings`] for the caller to
//! report once logging is up.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use beacon_core::FRAME_HEADER_LEN;
use beacon_logging::{LogFormat, LogLevel};
use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::BeaconSettings;

/// Smallest upgrade-request head the server may be limited to. A minimal
/// RFC 6455 request with a long host name stays below this.
pub const MIN_HANDSHAKE_BYTES: usize = 512;

/// Settings plus the environment overrides that were ignored.
#[derive(Debug)]
pub struct LoadedSettings {
    /// Validated settings.
    pub settings: BeaconSettings,
    /// Overrides whose values could not be used.
    pub rejected: Vec<RejectedOverride>,
}

/// An environment variable whose value was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedOverride {
    /// Variable name.
    pub key: &'static str,
    /// Value as found in the environment.
    pub value: String,
    /// What the variable accepts.
    pub expected: String,
}

impl fmt::Display for RejectedOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:?} ignored, expected {}",
            self.key, self.value, self.expected
        )
    }
}

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load from the default path and the process environment.
pub fn load_settings() -> Result<LoadedSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` and the process environment.
///
/// A missing file means defaults. An unreadable or malformed file, or
/// settings that fail [`validate`], are errors.
pub fn load_settings_from_path(path: &Path) -> Result<LoadedSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Load from `path`, resolving overrides through `lookup` instead of the
/// process environment.
pub fn load_settings_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<LoadedSettings> {
    let mut settings = read_settings_file(path)?;
    let rejected = apply_overrides(&mut settings, lookup);
    validate(&settings)?;
    Ok(LoadedSettings { settings, rejected })
}

fn read_settings_file(path: &Path) -> Result<BeaconSettings> {
    let parse_err = |source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut merged = serde_json::to_value(BeaconSettings::default()).map_err(parse_err)?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let user: Value = serde_json::from_str(&content).map_err(parse_err)?;
            deep_merge(&mut merged, user);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    serde_json::from_value(merged).map_err(parse_err)
}

/// Overlay `source` onto `target`.
///
/// Objects merge key by key, nulls leave the target alone, and anything
/// else replaces the target outright.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (_, Value::Null) => {}
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = dst.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &BeaconSettings) -> Result<()> {
    let server = &settings.server;
    if server.backlog == 0 {
        return Err(SettingsError::invalid("backlog", "must be at least 1"));
    }
    if server.idle_timeout_ms == 0 {
        return Err(SettingsError::invalid("idleTimeoutMs", "must be positive"));
    }
    if server.sweep_interval_ms == 0 || server.sweep_interval_ms > server.idle_timeout_ms {
        return Err(SettingsError::invalid(
            "sweepIntervalMs",
            format!("must be between 1 and idleTimeoutMs ({})", server.idle_timeout_ms),
        ));
    }
    if server.max_frame_length < FRAME_HEADER_LEN {
        return Err(SettingsError::invalid(
            "maxFrameLength",
            "must cover the 16-byte frame header",
        ));
    }
    if server.max_handshake_bytes < MIN_HANDSHAKE_BYTES {
        return Err(SettingsError::invalid(
            "maxHandshakeBytes",
            format!("must be at least {MIN_HANDSHAKE_BYTES}"),
        ));
    }
    if server.outbound_queue == 0 {
        return Err(SettingsError::invalid("outboundQueue", "must be at least 1"));
    }
    Ok(())
}

/// Apply `BEACON_*` overrides found through `lookup`.
///
/// Empty values are treated as unset. Values that do not parse, or fall
/// outside their range, leave the setting untouched and are returned.
pub fn apply_overrides(
    settings: &mut BeaconSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<RejectedOverride> {
    let mut env = Overrides {
        lookup,
        rejected: Vec::new(),
    };
    let server = &mut settings.server;

    if let Some(host) = env.raw("BEACON_HOST") {
        server.host = host;
    }
    if let Some(port) = env.range("BEACON_PORT", 1..=u16::MAX) {
        server.port = port;
    }
    if let Some(backlog) = env.range("BEACON_BACKLOG", 1..=65_535_u32) {
        server.backlog = backlog;
    }
    if let Some(ms) = env.range("BEACON_IDLE_TIMEOUT_MS", 100..=86_400_000_u64) {
        server.idle_timeout_ms = ms;
    }
    if let Some(ms) = env.range("BEACON_SWEEP_INTERVAL_MS", 10..=600_000_u64) {
        server.sweep_interval_ms = ms;
    }
    if let Some(len) = env.range("BEACON_MAX_FRAME_LENGTH", 16..=1_usize << 31) {
        server.max_frame_length = len;
    }
    if let Some(level) = env.choice(
        "BEACON_LOG_LEVEL",
        "one of trace, debug, info, warn, error",
        LogLevel::parse,
    ) {
        settings.logging.level = level;
    }
    if let Some(format) = env.choice("BEACON_LOG_FORMAT", "compact or json", LogFormat::parse) {
        settings.logging.format = format;
    }
    env.rejected
}

/// Parse `value` as a number inside `bounds`.
pub fn parse_range<T>(value: &str, bounds: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    value.trim().parse().ok().filter(|n| bounds.contains(n))
}

struct Overrides<F> {
    lookup: F,
    rejected: Vec<RejectedOverride>,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn range<T>(&mut self, key: &'static str, bounds: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd + fmt::Display,
    {
        let value = self.raw(key)?;
        let parsed = parse_range(&value, &bounds);
        if parsed.is_none() {
            let expected = format!("an integer in {}..={}", bounds.start(), bounds.end());
            self.rejected.push(RejectedOverride {
                key,
                value,
                expected,
            });
        }
        parsed
    }

    fn choice<T>(
        &mut self,
        key: &'static str,
        expected: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        let value = self.raw(key)?;
        let parsed = parse(&value);
        if parsed.is_none() {
            self.rejected.push(RejectedOverride {
                key,
                value,
                expected: expected.to_owned(),
            });
        }
        parsed
    }
}
