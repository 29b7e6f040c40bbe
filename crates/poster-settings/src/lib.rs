//! # poster-settings
//!
//! Layered configuration for the posting agent.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PosterSettings::default()`]
//! 2. **User file**: `~/.poster/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `POSTER_*` overrides (highest priority)
//!
//! The loaded value is validated and then passed explicitly to each
//! component; there is no global settings instance.
//!
//! ```no_run
//! use poster_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("max daily posts: {}", settings.schedule.max_daily_posts);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, poster_home, settings_path};
pub use types::*;
