// Configuration loader for Audio API
//
// This module handles loading configuration from the configuration file
// and environment variables with appropriate precedence.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

const DEFAULT_CONFIG_FILE_PATH: &str = "audio_api.json";

/// Returns the configuration file location, `AUDIO_API_CONFIG` taking precedence
pub fn config_file_path() -> PathBuf {
    env::var("AUDIO_API_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE_PATH))
}

/// Loads configuration from the configuration file into the environment
///
/// Configuration precedence (highest to lowest):
/// 1. Environment variables
/// 2. Configuration file values
/// 3. Default values (not handled here - application defaults)
///
/// The file is a flat JSON object, or a flat TOML table when its extension is `.toml`.
///
/// # Returns
///
/// Returns true if the config file was successfully loaded, false otherwise
pub fn load_config() -> bool {
    load_config_from(&config_file_path())
}

/// Same as [`load_config`] with an explicit file path
pub fn load_config_from(config_path: &Path) -> bool {
    if !config_path.exists() {
        debug!("Configuration file not found at: {}", config_path.display());
        return false;
    }

    let config_content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read configuration file: {}", e);
            return false;
        }
    };

    let is_toml = config_path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let parsed = if is_toml {
        parse_toml(&config_content)
    } else {
        parse_json(&config_content)
    };

    let config_map = match parsed {
        Ok(map) => map,
        Err(e) => {
            warn!("Failed to parse configuration file: {}", e);
            return false;
        }
    };

    apply_to_env(config_map);

    info!("Configuration loaded from {}", config_path.display());
    true
}

/// Flatten a JSON object into key/value strings
fn parse_json(content: &str) -> Result<HashMap<String, String>, String> {
    let value: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let object = match value {
        serde_json::Value::Object(object) => object,
        _ => return Err("top-level value must be an object".to_string()),
    };

    let mut config_map = HashMap::new();
    for (key, value) in object {
        match value {
            serde_json::Value::String(s) => {
                config_map.insert(key, s);
            }
            serde_json::Value::Number(n) => {
                config_map.insert(key, n.to_string());
            }
            serde_json::Value::Bool(b) => {
                config_map.insert(key, b.to_string());
            }
            _ => {
                warn!("Skipping unsupported JSON value type for key: {}", key);
            }
        }
    }
    Ok(config_map)
}

/// Flatten a TOML table into key/value strings
fn parse_toml(content: &str) -> Result<HashMap<String, String>, String> {
    let value: toml::Value = content.parse().map_err(|e: toml::de::Error| e.to_string())?;
    let table = match value {
        toml::Value::Table(table) => table,
        _ => return Err("top-level value must be a table".to_string()),
    };

    let mut config_map = HashMap::new();
    for (key, value) in table {
        match value {
            toml::Value::String(s) => {
                config_map.insert(key, s);
            }
            toml::Value::Integer(i) => {
                config_map.insert(key, i.to_string());
            }
            toml::Value::Float(f) => {
                config_map.insert(key, f.to_string());
            }
            toml::Value::Boolean(b) => {
                config_map.insert(key, b.to_string());
            }
            _ => {
                warn!("Skipping unsupported TOML value type for key: {}", key);
            }
        }
    }
    Ok(config_map)
}

fn apply_to_env(config_map: HashMap<String, String>) {
    for (key, value) in config_map {
        // Environment wins over the file
        if env::var(&key).is_err() {
            debug!("Setting env var from config file: {} = {}", key, value);
            env::set_var(key, value);
        } else {
            debug!("Env var already exists, skipping: {}", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_json_flattens_scalars() {
        let map = parse_json(r#"{"A": "x", "B": 3, "C": true, "D": [1, 2]}"#).unwrap();
        assert_eq!(map.get("A").map(String::as_str), Some("x"));
        assert_eq!(map.get("B").map(String::as_str), Some("3"));
        assert_eq!(map.get("C").map(String::as_str), Some("true"));
        assert!(!map.contains_key("D"));
    }

    #[test]
    fn test_parse_json_rejects_non_object() {
        assert!(parse_json("[1, 2]").is_err());
        assert!(parse_json("not json").is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_api.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"AUDIO_API_LOADER_TEST_KEEP": "from-file", "AUDIO_API_LOADER_TEST_NEW": "from-file"}}"#
        )
        .unwrap();

        env::set_var("AUDIO_API_LOADER_TEST_KEEP", "from-env");
        env::remove_var("AUDIO_API_LOADER_TEST_NEW");

        assert!(load_config_from(&path));
        assert_eq!(env::var("AUDIO_API_LOADER_TEST_KEEP").unwrap(), "from-env");
        assert_eq!(env::var("AUDIO_API_LOADER_TEST_NEW").unwrap(), "from-file");
    }

    #[test]
    fn test_toml_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio_api.toml");
        fs::write(&path, "AUDIO_API_LOADER_TEST_TOML = 12\n").unwrap();
        env::remove_var("AUDIO_API_LOADER_TEST_TOML");

        assert!(load_config_from(&path));
        assert_eq!(env::var("AUDIO_API_LOADER_TEST_TOML").unwrap(), "12");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        assert!(!load_config_from(Path::new("/nonexistent/audio_api.json")));
    }
}
