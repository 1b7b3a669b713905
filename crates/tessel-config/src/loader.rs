//! Config file discovery and layered loading.
//!
//! `Config::load` merges, lowest precedence first:
//! 1. the embedded `defaults.toml`
//! 2. `/etc/tessel/config.toml`
//! 3. `~/.tessel/config.toml`
//! 4. an explicit file supplied by the caller
//! 5. `TESSEL_LOCK_TIMEOUT_MS`, `TESSEL_START_LEVEL` and `TESSEL_LOG_LEVEL`
//!
//! then deserializes and validates the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Environment variable overriding `framework.lock_timeout_ms`.
pub const ENV_LOCK_TIMEOUT_MS: &str = "TESSEL_LOCK_TIMEOUT_MS";
/// Environment variable overriding `framework.beginning_start_level`.
pub const ENV_START_LEVEL: &str = "TESSEL_START_LEVEL";
/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "TESSEL_LOG_LEVEL";

/// A loaded configuration plus where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final, validated configuration.
    pub config: Config,
    /// Layer that set each leaf field.
    pub field_sources: FieldSources,
    /// Files that were found and merged, in merge order.
    pub loaded_files: Vec<PathBuf>,
}

/// Where `load` looks for files.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// System config path. `None` uses `/etc/tessel/config.toml`.
    pub system_path: Option<PathBuf>,
    /// Directory holding the user's `config.toml`. `None` uses `~/.tessel`.
    pub user_dir: Option<PathBuf>,
    /// Highest-precedence file.
    pub explicit: Option<PathBuf>,
}

/// Load the layered configuration using the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, an
/// environment override does not parse, or validation fails.
pub fn load(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
    load_with_env(options, &collect_env_vars())
}

/// Load the layered configuration using the given environment snapshot.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    options: &LoadOptions,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged = parse_str(DEFAULTS_TOML, "<embedded defaults>")?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    let system_path = options
        .system_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("/etc/tessel/config.toml"));
    let user_path = match &options.user_dir {
        Some(dir) => dir.join("config.toml"),
        None => home_directory()?.join(".tessel").join("config.toml"),
    };

    let layers = [
        (Some(system_path), ConfigLayer::System),
        (Some(user_path), ConfigLayer::User),
        (options.explicit.clone(), ConfigLayer::Explicit),
    ];
    for (path, layer) in layers {
        let Some(path) = path else { continue };
        let overlay = if layer == ConfigLayer::Explicit {
            // A missing explicit file is an error, not a skipped layer.
            Some(read_file(&path)?)
        } else {
            try_load_file(&path)?
        };
        if let Some(overlay) = overlay {
            deep_merge(&mut merged, &overlay, layer, &mut field_sources);
            info!(path = %path.display(), layer = %layer, "Loaded config file");
            loaded_files.push(path);
        }
    }

    let env_count = apply_env_overrides(&mut merged, env_vars, &mut field_sources)?;
    if env_count > 0 {
        debug!(count = env_count, "Applied environment overrides");
    }

    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: "<merged config>".to_owned(),
            source: e,
        })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load and validate a single file on top of the embedded defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or
/// validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let mut merged = parse_str(DEFAULTS_TOML, "<embedded defaults>")?;
    let overlay = read_file(path)?;
    deep_merge(
        &mut merged,
        &overlay,
        ConfigLayer::Explicit,
        &mut FieldSources::new(),
    );
    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn parse_str(content: &str, origin: &str) -> ConfigResult<toml::Value> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })
}

/// Read a file, returning `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    match read_file(path) {
        Ok(v) => Ok(Some(v)),
        Err(ConfigError::ReadError { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            debug!(path = %path.display(), "Config file not found, skipping");
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    // Size checked after reading, single syscall path.
    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    parse_str(&content, &path.display().to_string())
}

fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("TESSEL_"))
        .collect()
}

/// Apply `TESSEL_*` overrides to the merged tree. Returns how many applied.
fn apply_env_overrides(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String>,
    sources: &mut FieldSources,
) -> ConfigResult<usize> {
    let mut applied: usize = 0;

    if let Some(raw) = env_vars.get(ENV_LOCK_TIMEOUT_MS) {
        let ms = parse_env_int(ENV_LOCK_TIMEOUT_MS, raw)?;
        set_value(merged, "framework", "lock_timeout_ms", toml::Value::Integer(ms));
        sources.insert("framework.lock_timeout_ms".into(), ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }
    if let Some(raw) = env_vars.get(ENV_START_LEVEL) {
        let level = parse_env_int(ENV_START_LEVEL, raw)?;
        set_value(merged, "framework", "beginning_start_level", toml::Value::Integer(level));
        sources.insert("framework.beginning_start_level".into(), ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }
    if let Some(raw) = env_vars.get(ENV_LOG_LEVEL) {
        let level = raw.trim().to_ascii_lowercase();
        set_value(merged, "logging", "level", toml::Value::String(level));
        sources.insert("logging.level".into(), ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }

    Ok(applied)
}

fn parse_env_int(var: &str, raw: &str) -> ConfigResult<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|v| *v >= 0)
        .ok_or_else(|| ConfigError::EnvError {
            var: var.to_owned(),
            message: format!("'{raw}' is not a non-negative integer"),
        })
}

fn set_value(root: &mut toml::Value, section: &str, key: &str, value: toml::Value) {
    let toml::Value::Table(root) = root else {
        return;
    };
    let entry = root
        .entry(section.to_owned())
        .or_insert(toml::Value::Table(toml::Table::new()));
    if let toml::Value::Table(table) = entry {
        table.insert(key.to_owned(), value);
    }
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}
