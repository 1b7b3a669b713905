#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for the Tessel module runtime.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tessel_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("lock timeout: {}ms", resolved.config.framework.lock_timeout_ms);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`TESSEL_LOCK_TIMEOUT_MS`, `TESSEL_START_LEVEL`,
//!    `TESSEL_LOG_LEVEL`)
//! 2. **Explicit file** passed to [`Config::load`]
//! 3. **User** (`~/.tessel/config.toml`)
//! 4. **System** (`/etc/tessel/config.toml`)
//! 5. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate has no dependencies on other internal tessel crates. The
//! framework converts [`Config`] into its own settings type through a bridge
//! module.

/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered merging of raw TOML trees.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{LoadOptions, ResolvedConfig};
pub use merge::{ConfigLayer, FieldSources};
pub use types::*;

impl Config {
    /// Load the layered configuration, with `explicit` as the highest file
    /// layer.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any layer is malformed or the merged
    /// configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(&LoadOptions {
            explicit: explicit.map(std::path::Path::to_path_buf),
            ..LoadOptions::default()
        })
    }

    /// Load with a custom user directory instead of `~/.tessel`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any layer is malformed or the merged
    /// configuration fails validation.
    pub fn load_with_home(
        user_dir: &std::path::Path,
        explicit: Option<&std::path::Path>,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(&LoadOptions {
            user_dir: Some(user_dir.to_path_buf()),
            explicit: explicit.map(std::path::Path::to_path_buf),
            ..LoadOptions::default()
        })
    }

    /// Load a single file over the embedded defaults (no other layers).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or
    /// fails validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serializes_to_json() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"lock_timeout_ms\":30000"));
        assert!(json.contains("\"tessel.framework.*\""));
    }

    #[test]
    fn test_bare_section_uses_defaults() {
        let config: Config = toml::from_str("[framework]\n[logging]\nlevel = \"warn\"\n").unwrap();
        assert_eq!(config.framework, FrameworkSection::default());
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "pretty");
    }
}
