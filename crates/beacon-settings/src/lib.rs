//! # beacon-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BeaconSettings::default()`]
//! 2. **User file**: `~/.beacon/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `BEACON_*` overrides (highest priority)
//!
//! The server crate never reads settings itself; the daemon turns
//! [`ServerSettings`] into a plain `ServerConfig`.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    LoadedSettings, MIN_HANDSHAKE_BYTES, RejectedOverride, apply_overrides, deep_merge,
    load_settings, load_settings_from_path, load_settings_with, parse_range, settings_path,
    validate,
};
pub use types::{BeaconSettings, LoggingSettings, ServerSettings};
