//! Bridge from `tessel_config::Config` to framework types.
//!
//! The config crate has no dependencies on other internal crates, and the
//! framework never reads configuration files itself. Embedders load a
//! [`Config`] and convert it here, in one place.

use std::time::Duration;

use tessel_config::{Config, ConfigError, ConfigResult};
use tessel_events::EventBus;
use tessel_telemetry::{LogConfig, LogFormat};

use crate::package::PackagePattern;
use crate::settings::FrameworkSettings;

/// Convert config to [`FrameworkSettings`].
///
/// # Errors
///
/// Returns a validation error naming `framework.system_packages` if a
/// package pattern is malformed.
pub fn to_framework_settings(cfg: &Config) -> ConfigResult<FrameworkSettings> {
    let system_packages = cfg
        .framework
        .system_packages
        .iter()
        .map(|p| {
            p.parse::<PackagePattern>()
                .map_err(|e| ConfigError::ValidationError {
                    field: "framework.system_packages".into(),
                    message: e.to_string(),
                })
        })
        .collect::<ConfigResult<Vec<_>>>()?;

    Ok(FrameworkSettings {
        lock_timeout: Duration::from_millis(cfg.framework.lock_timeout_ms),
        beginning_start_level: cfg.framework.beginning_start_level,
        initial_bundle_start_level: cfg.framework.initial_bundle_start_level,
        system_packages,
        storage_clean: cfg.framework.storage_clean,
    })
}

/// Build an [`EventBus`] sized by the `[events]` section.
#[must_use]
pub fn to_event_bus(cfg: &Config) -> EventBus {
    EventBus::with_capacity(cfg.events.channel_capacity)
}

/// Convert the `[logging]` section to a telemetry [`LogConfig`].
///
/// Unknown format names fall back to the default format; validation has
/// already rejected them for configs produced by `Config::load`.
#[must_use]
pub fn to_log_config(cfg: &Config) -> LogConfig {
    let format = LogFormat::from_name(&cfg.logging.format).unwrap_or_default();
    cfg.logging
        .directives
        .iter()
        .fold(LogConfig::new(&cfg.logging.level).with_format(format), |log, d| {
            log.with_directive(d)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_default_settings() {
        let settings = to_framework_settings(&Config::default()).unwrap();
        assert_eq!(settings, FrameworkSettings::default());
        assert!(settings.is_system_package("tessel.framework"));
        assert!(settings.is_system_package("tessel.framework.hooks"));
        assert!(!settings.is_system_package("tessel"));
    }

    #[test]
    fn test_custom_values_carry_over() {
        let mut cfg = Config::default();
        cfg.framework.lock_timeout_ms = 250;
        cfg.framework.beginning_start_level = 4;
        cfg.framework.system_packages = vec!["*".into()];
        cfg.framework.storage_clean = true;

        let settings = to_framework_settings(&cfg).unwrap();
        assert_eq!(settings.lock_timeout, Duration::from_millis(250));
        assert_eq!(settings.beginning_start_level, 4);
        assert_eq!(settings.system_packages, vec![PackagePattern::Any]);
        assert!(settings.storage_clean);
    }

    #[test]
    fn test_bad_pattern_is_a_validation_error() {
        let mut cfg = Config::default();
        cfg.framework.system_packages = vec!["a..b".into()];
        match to_framework_settings(&cfg) {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "framework.system_packages");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_event_bus_and_log_config() {
        let mut cfg = Config::default();
        cfg.events.channel_capacity = 16;
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["tessel_framework::lock=trace".into()];

        assert_eq!(to_event_bus(&cfg).capacity(), 16);
        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["tessel_framework::lock=trace".to_string()]);
    }
}
