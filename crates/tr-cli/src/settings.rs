//! CLI configuration file.
//!
//! ```toml
//! rules = "rules.json"
//!
//! [engine]
//! poll_interval_ms = 500
//! promote_on_match = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tr_runtime::EngineConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rule file used when `--rules` is not given
    pub rules: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Settings {
    /// Load from `path`, or defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
        Self::parse(&text).map_err(|e| format!("Invalid config '{}': {}", path.display(), e))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Rule file to operate on: the explicit flag wins over the config file.
    pub fn rules_path(&self, explicit: Option<PathBuf>) -> Result<PathBuf, String> {
        explicit
            .or_else(|| self.rules.clone())
            .ok_or_else(|| "No rule file given (use --rules or set `rules` in the config)".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Settings::parse("").unwrap();
        assert!(settings.rules.is_none());
        assert_eq!(settings.engine, EngineConfig::default());
    }

    #[test]
    fn test_partial_engine_table() {
        let settings = Settings::parse(
            r#"
            rules = "my-rules.json"

            [engine]
            poll_interval_ms = 250
            promote_on_match = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.rules, Some(PathBuf::from("my-rules.json")));
        assert_eq!(settings.engine.poll_interval_ms, 250);
        assert!(settings.engine.promote_on_match);
        assert!(settings.engine.web_only);
    }

    #[test]
    fn test_rules_path_precedence() {
        let settings = Settings {
            rules: Some(PathBuf::from("from-config.json")),
            ..Settings::default()
        };
        assert_eq!(
            settings.rules_path(Some(PathBuf::from("flag.json"))).unwrap(),
            PathBuf::from("flag.json")
        );
        assert_eq!(settings.rules_path(None).unwrap(), PathBuf::from("from-config.json"));
        assert!(Settings::default().rules_path(None).is_err());
    }

    #[test]
    fn test_bad_types_rejected() {
        assert!(Settings::parse("[engine]\npoll_interval_ms = \"fast\"").is_err());
    }
}
