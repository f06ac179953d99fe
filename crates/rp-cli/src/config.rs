use std::fs;
use std::path::Path;

use rp_compiler::CompilerConfig;
use rp_core::EngineConfig;
use serde::Deserialize;

/// Optional JSON config file. Every field falls back to its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub engine: EngineConfig,
    pub compiler: CompilerConfig,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config '{}': {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Invalid config '{}': {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"compiler": {"maxRules": 100}}"#).unwrap();
        assert_eq!(config.compiler.max_rules, 100);
        assert_eq!(config.compiler.priority, 1);
        assert_eq!(config.engine.notification_capacity, rp_core::notify::DEFAULT_CAPACITY);
    }

    #[test]
    fn test_no_path_is_default() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.compiler.max_rules, rp_compiler::declarative::DEFAULT_MAX_RULES);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"engine": {"notificationCapacity": 4}, "compiler": {"priority": 2}}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.engine.notification_capacity, 4);
        assert_eq!(config.compiler.priority, 2);

        assert!(Config::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
