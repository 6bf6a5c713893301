//! # mxws-settings
//!
//! Configuration for the proxy, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MxwsSettings::default()`]
//! 2. **Settings file**: `~/.mxws/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `MXWS_*` overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings_from_path, settings_path,
};
pub use types::*;
