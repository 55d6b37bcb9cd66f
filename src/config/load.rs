// Config file loading, merging and environment overrides

use crate::error::{Result, WardenError};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Prefix of environment variables that override global settings
pub const ENV_PREFIX: &str = "WARDEN_";

/// Key whose lists are concatenated rather than replaced when merging
const PROCESSES: &str = "processes";

/// Globals that may be set from the environment
const ENV_KEYS: &[&str] = &[
    "debug",
    "log",
    "stdout_log",
    "stderr_log",
    "log_max_size_mb",
    "log_backups",
    "log_max_age_days",
    "log_timestamps",
    "seq",
    "autorestart",
    "restart_delay_ms",
    "max_pss_mb",
    "guard_interval_ms",
    "uid",
    "gid",
    "shell",
];

// Taken verbatim, never parsed as JSON
const PATH_KEYS: &[&str] = &["log", "stdout_log", "stderr_log"];

/// Read one config file, TOML or JSON by extension, as an untyped tree
pub fn read_value(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        WardenError::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    match extension {
        "toml" => toml::from_str(&contents).map_err(|e| {
            WardenError::InvalidConfig(format!("Failed to parse TOML {}: {}", path.display(), e))
        }),
        "json" => serde_json::from_str(&contents).map_err(|e| {
            WardenError::InvalidConfig(format!("Failed to parse JSON {}: {}", path.display(), e))
        }),
        _ => Err(WardenError::InvalidConfig(format!(
            "Unsupported file format: {}. Use .toml or .json",
            extension
        ))),
    }
}

/// Layer `overlay` on top of `base`
///
/// Tables merge key by key and `processes` lists are concatenated. Any other
/// value in `overlay` replaces the one in `base`.
pub fn merge(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Object(overlay) if base.is_object() => {
            for (key, value) in overlay {
                match base.get_mut(key.as_str()) {
                    Some(Value::Array(items)) if key == PROCESSES && value.is_array() => {
                        if let Value::Array(more) = value {
                            items.extend(more);
                        }
                    }
                    Some(existing) => merge(existing, value),
                    None => {
                        if let Some(table) = base.as_object_mut() {
                            table.insert(key, value);
                        }
                    }
                }
            }
        }
        overlay => *base = overlay,
    }
}

/// Override globals from `WARDEN_<KEY>` variables found through `lookup`
///
/// Values are read as JSON scalars where they parse as one, so `true` and
/// `250` keep their types; anything else is taken as a string.
pub fn apply_env<F>(value: &mut Value, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(table) = value.as_object_mut() else {
        return;
    };

    for key in ENV_KEYS {
        let var = format!("{}{}", ENV_PREFIX, key.to_uppercase());
        let Some(raw) = lookup(&var) else {
            continue;
        };

        let parsed = if PATH_KEYS.contains(key) {
            Value::String(raw)
        } else {
            serde_json::from_str(raw.trim()).unwrap_or(Value::String(raw))
        };
        debug!("{} overrides {}", var, key);
        table.insert(key.to_string(), parsed);
    }
}
