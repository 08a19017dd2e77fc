use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const CONFIG_FILE_PATH: &str = "convo.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub write_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_history_depth: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("convo.db"),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            write_timeout_secs: 60,
            read_timeout_secs: 300,
            max_history_depth: 10_000,
        }
    }
}

impl Config {
    /// Load `path` (or `convo.toml` in the working directory when present), then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE_PATH).exists() => {
                Self::from_file(Path::new(CONFIG_FILE_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(db) = var("CONVO_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(api_key) = var("OPENAI_API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(api_base) = var("API_BASE") {
            self.api_base = api_base;
        }
        if let Some(model) = var("MODEL") {
            self.model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_provider_timeouts() {
        let config = Config::default();
        assert_eq!(config.write_timeout_secs, 60);
        assert_eq!(config.read_timeout_secs, 300);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convo.toml");
        std::fs::write(&path, "model = \"gpt-4o\"\nread_timeout_secs = 30\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.read_timeout_secs, 30);
        assert_eq!(config.write_timeout_secs, 60);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convo.toml");
        std::fs::write(&path, "model = [").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("CONVO_DB", "/tmp/other.db"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MODEL", "gpt-4o-mini"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }
}
