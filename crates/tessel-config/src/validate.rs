//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Upper bound for `framework.lock_timeout_ms` (one hour).
pub const MAX_LOCK_TIMEOUT_MS: u64 = 3_600_000;

/// Validate a merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_framework(config)?;
    validate_events(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_framework(config: &Config) -> ConfigResult<()> {
    let f = &config.framework;

    if f.lock_timeout_ms == 0 || f.lock_timeout_ms > MAX_LOCK_TIMEOUT_MS {
        return Err(invalid(
            "framework.lock_timeout_ms",
            format!("must be between 1 and {MAX_LOCK_TIMEOUT_MS}"),
        ));
    }
    if f.beginning_start_level == 0 {
        return Err(invalid("framework.beginning_start_level", "must be at least 1"));
    }
    if f.initial_bundle_start_level == 0 {
        return Err(invalid(
            "framework.initial_bundle_start_level",
            "must be at least 1",
        ));
    }
    for pkg in &f.system_packages {
        let name = pkg.strip_suffix(".*").unwrap_or(pkg);
        if pkg != "*" && (name.is_empty() || name.split('.').any(str::is_empty)) {
            return Err(invalid(
                "framework.system_packages",
                format!("'{pkg}' is not a package name or pattern"),
            ));
        }
    }
    Ok(())
}

fn validate_events(config: &Config) -> ConfigResult<()> {
    if config.events.channel_capacity == 0 {
        return Err(invalid("events.channel_capacity", "must be at least 1"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_lock_timeout_bounds() {
        let mut config = Config::default();
        config.framework.lock_timeout_ms = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "framework.lock_timeout_ms");

        config.framework.lock_timeout_ms = MAX_LOCK_TIMEOUT_MS;
        assert!(validate(&config).is_ok());

        config.framework.lock_timeout_ms = MAX_LOCK_TIMEOUT_MS.saturating_add(1);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_start_levels_must_be_positive() {
        let mut config = Config::default();
        config.framework.beginning_start_level = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "framework.beginning_start_level"
        );

        let mut config = Config::default();
        config.framework.initial_bundle_start_level = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "framework.initial_bundle_start_level"
        );
    }

    #[test]
    fn test_system_package_patterns() {
        let mut config = Config::default();
        config.framework.system_packages = vec!["*".into(), "a.b".into(), "a.*".into()];
        assert!(validate(&config).is_ok());

        config.framework.system_packages = vec!["a..b".into()];
        assert!(validate(&config).is_err());

        config.framework.system_packages = vec![".*".into()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_capacity() {
        let mut config = Config::default();
        config.events.channel_capacity = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "events.channel_capacity");
    }

    #[test]
    fn test_invalid_logging() {
        let mut config = Config::default();
        config.logging.level = "verbose".into();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }
}
