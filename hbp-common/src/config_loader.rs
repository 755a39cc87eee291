//! Modular configuration loader.
//!
//! Supports loading configuration from multiple files:
//! - `config.json` - Core configuration (observability, inline engine tables)
//! - `indicators.json` - Indicator ideal/tolerance table → `engine.indicators`
//! - `sectors.json` - Sector taxonomy and sensitivity table → `engine.sectors`
//! - `scoring.json` - Asset scoring weights → `engine.scoring`
//! - `optimizer.json` - Solver settings and default constraints → `engine.optimizer`
//!
//! Files are loaded from `~/.hbp/` (or `HBP_CONFIG_DIR`) and deep-merged, with
//! the modular files taking precedence over `config.json`.

use serde_json::Value;
use std::fs;
use std::path::PathBuf;

use crate::config::config_dir;
use crate::error::{Error, Result, ResultExt};

/// Configuration file names
pub const CONFIG_FILES: &[&str] = &[
    "config.json",
    "indicators.json",
    "sectors.json",
    "scoring.json",
    "optimizer.json",
];

/// Modular file name → key under the `engine` section.
const ENGINE_SECTIONS: &[(&str, &str)] = &[
    ("indicators.json", "indicators"),
    ("sectors.json", "sectors"),
    ("scoring.json", "scoring"),
    ("optimizer.json", "optimizer"),
];

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
fn load_json_file(path: &PathBuf) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content =
        fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", path.display())))?;

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => {
                        merge_json(target_value, source_value);
                    }
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Drop meta-fields (`$schema`, `_comment`, ...) from a modular file.
fn strip_meta_fields(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(key, _)| !key.starts_with('$') && !key.starts_with('_'))
                .collect(),
        ),
        other => other,
    }
}

/// Load modular configuration from the config directory.
///
/// Priority (lowest to highest):
/// 1. config.json
/// 2. Modular files (indicators.json, sectors.json, ...)
/// 3. Environment variables (applied separately)
pub fn load_modular_config(dir: Option<PathBuf>) -> Result<Value> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    let config_path = cfg_dir.join("config.json");
    let mut config = load_json_file(&config_path)?.unwrap_or(Value::Object(Default::default()));

    tracing::debug!("Loading modular config from {}", cfg_dir.display());

    for (file, section) in ENGINE_SECTIONS {
        let Some(table) = load_json_file(&cfg_dir.join(file))? else {
            continue;
        };
        let table = strip_meta_fields(table);

        if let Some(config_obj) = config.as_object_mut() {
            let engine = config_obj
                .entry("engine")
                .or_insert(Value::Object(Default::default()));

            if let Some(engine_obj) = engine.as_object_mut() {
                match engine_obj.get_mut(*section) {
                    Some(existing) => merge_json(existing, table),
                    None => {
                        engine_obj.insert((*section).to_string(), table);
                    }
                }
            }
        }
        tracing::debug!(file = *file, section = *section, "Loaded modular config file");
    }

    Ok(config)
}

/// Check which modular config files exist.
pub fn check_modular_files(dir: Option<PathBuf>) -> Vec<(String, bool)> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    CONFIG_FILES
        .iter()
        .map(|file| {
            let path = cfg_dir.join(file);
            (file.to_string(), path.exists())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_objects() {
        let mut target = json!({
            "a": 1,
            "b": {
                "x": 10,
                "y": 20
            }
        });

        let source = json!({
            "b": {
                "y": 25,
                "z": 30
            },
            "c": 3
        });

        merge_json(&mut target, source);

        assert_eq!(target["a"], 1);
        assert_eq!(target["b"]["x"], 10);
        assert_eq!(target["b"]["y"], 25);
        assert_eq!(target["b"]["z"], 30);
        assert_eq!(target["c"], 3);
    }

    #[test]
    fn test_merge_json_overwrite_non_object() {
        let mut target = json!({ "a": [1, 2, 3] });
        let source = json!({ "a": [4, 5] });

        merge_json(&mut target, source);

        assert_eq!(target["a"], json!([4, 5]));
    }

    #[test]
    fn test_modular_files_land_under_engine() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{ "engine": { "scoring": { "valuation_weight": 0.6, "macro_weight": 0.4 } } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("scoring.json"),
            r#"{ "$schema": "ignored", "macro_weight": 0.5 }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("optimizer.json"),
            r#"{ "settings": { "max_iterations": 100 } }"#,
        )
        .unwrap();

        let merged = load_modular_config(Some(dir.path().to_path_buf())).unwrap();

        assert_eq!(merged["engine"]["scoring"]["valuation_weight"], 0.6);
        assert_eq!(merged["engine"]["scoring"]["macro_weight"], 0.5);
        assert!(merged["engine"]["scoring"].get("$schema").is_none());
        assert_eq!(merged["engine"]["optimizer"]["settings"]["max_iterations"], 100);
    }

    #[test]
    fn test_check_modular_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sectors.json"), "{}").unwrap();

        let present = check_modular_files(Some(dir.path().to_path_buf()));
        assert_eq!(present.len(), CONFIG_FILES.len());
        assert!(present.contains(&("sectors.json".to_string(), true)));
        assert!(present.contains(&("config.json".to_string(), false)));
    }

    #[test]
    fn test_invalid_json_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("indicators.json"), "{ broken").unwrap();

        let err = load_modular_config(Some(dir.path().to_path_buf())).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("indicators.json"));
    }
}
