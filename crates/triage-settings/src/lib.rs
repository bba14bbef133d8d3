//! # triage-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TriageSettings::default()`]
//! 2. **User file**: `~/.triage/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TRIAGE_*` overrides (highest priority)
//!
//! The loaded value is validated and then passed explicitly to the
//! components that need it; there is no global settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
