//! Deep merge of raw TOML trees.
//!
//! Merging happens before deserialization so that a key missing from an
//! upper layer never resets the value set by a lower one.

use std::collections::BTreeMap;
use std::fmt;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// The embedded `defaults.toml`.
    Defaults,
    /// `/etc/tessel/config.toml`.
    System,
    /// `~/.tessel/config.toml`.
    User,
    /// A file passed explicitly by the embedding application.
    Explicit,
    /// A `TESSEL_*` environment variable.
    Environment,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::System => write!(f, "system (/etc/tessel/config.toml)"),
            Self::User => write!(f, "user (~/.tessel/config.toml)"),
            Self::Explicit => write!(f, "explicit file"),
            Self::Environment => write!(f, "environment variable"),
        }
    }
}

/// Dotted field path → layer that last set it.
pub type FieldSources = BTreeMap<String, ConfigLayer>;

/// Merge `overlay` into `base`.
///
/// Tables merge key by key; scalars and arrays from the overlay replace the
/// base value. Every leaf the overlay sets is recorded in `sources`.
pub fn deep_merge(
    base: &mut toml::Value,
    overlay: &toml::Value,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    merge_at(base, overlay, "", layer, sources);
}

fn merge_at(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let path = join(prefix, key);
                match base_table.get_mut(key) {
                    Some(base_val) => merge_at(base_val, overlay_val, &path, layer, sources),
                    None => {
                        base_table.insert(key.clone(), overlay_val.clone());
                        record_leaves(overlay_val, &path, layer, sources);
                    },
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
            record_leaves(overlay, prefix, layer, sources);
        },
    }
}

/// Record every leaf under `val` as coming from `layer`.
pub fn record_leaves(
    val: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            record_leaves(child, &join(prefix, key), layer, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), layer);
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_tables_merge_and_scalars_replace() {
        let mut base = parse(
            r#"
            [framework]
            lock_timeout_ms = 30000
            system_packages = ["a", "b"]
            [logging]
            level = "info"
            "#,
        );
        let overlay = parse(
            r#"
            [framework]
            system_packages = ["c"]
            "#,
        );
        let mut sources = FieldSources::new();
        deep_merge(&mut base, &overlay, ConfigLayer::User, &mut sources);

        let framework = base.get("framework").unwrap();
        assert_eq!(framework.get("lock_timeout_ms").unwrap().as_integer(), Some(30000));
        let pkgs = framework.get("system_packages").unwrap().as_array().unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(base.get("logging").unwrap().get("level").unwrap().as_str(), Some("info"));

        assert_eq!(sources.get("framework.system_packages"), Some(&ConfigLayer::User));
        assert!(!sources.contains_key("framework.lock_timeout_ms"));
    }

    #[test]
    fn test_new_table_is_recorded_per_leaf() {
        let mut base = parse("[framework]\nlock_timeout_ms = 1");
        let overlay = parse("[events]\nchannel_capacity = 8");
        let mut sources = FieldSources::new();
        deep_merge(&mut base, &overlay, ConfigLayer::System, &mut sources);

        assert_eq!(sources.get("events.channel_capacity"), Some(&ConfigLayer::System));
        assert_eq!(
            base.get("events").unwrap().get("channel_capacity").unwrap().as_integer(),
            Some(8)
        );
    }
}
