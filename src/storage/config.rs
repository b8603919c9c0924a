use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
    pub palette: PaletteConfig,
    #[serde(default)]
    pub profiles: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    pub events_table: String,
    pub todos_table: String,
    #[serde(default = "default_true")]
    pub all_day_column: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub user_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub offline_mode: bool,
    pub offline_db: PathBuf,
    pub past_days: u32,
    pub future_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaletteConfig {
    pub together: String,
    pub fallback: String,
    #[serde(default)]
    pub owners: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("duo-planner")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(config_path)?;
        Self::from_toml(&content)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: String::new(),
                api_key: String::new(),
                events_table: "events".to_string(),
                todos_table: "todos".to_string(),
                all_day_column: true,
            },
            session: SessionConfig {
                user_id: String::new(),
                access_token: None,
            },
            sync: SyncConfig {
                offline_mode: true,
                offline_db: Self::config_dir().join("offline.db"),
                past_days: 31,
                future_days: 62,
            },
            palette: PaletteConfig {
                together: "#8b5cf6".to_string(),
                fallback: "#9e9e9e".to_string(),
                owners: HashMap::new(),
            },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn default_config_uses_standard_tables() {
        let config = Config::default();
        assert_eq!(config.backend.events_table, "events");
        assert_eq!(config.backend.todos_table, "todos");
    }

    #[test]
    fn default_config_starts_offline() {
        let config = Config::default();
        assert!(config.sync.offline_mode);
    }

    #[test]
    fn default_palette_has_grey_fallback() {
        let config = Config::default();
        assert_eq!(config.palette.fallback, "#9e9e9e");
    }

    #[test]
    fn parse_valid_toml_config() {
        let toml_content = r##"
            [backend]
            url = "https://example.supabase.co"
            api_key = "anon-key"
            events_table = "events"
            todos_table = "todos"

            [session]
            user_id = "user-a"

            [sync]
            offline_mode = false
            offline_db = "/tmp/offline.db"
            past_days = 7
            future_days = 14

            [palette]
            together = "#8b5cf6"
            fallback = "#9e9e9e"

            [palette.owners]
            user-a = "#4cafef"
            user-b = "#ef5350"

            [profiles]
            user-a = "Alex"
        "##;

        let config = Config::from_toml(toml_content).unwrap();

        assert_eq!(config.backend.url, "https://example.supabase.co");
        assert!(config.backend.all_day_column);
        assert_eq!(config.session.access_token, None);
        assert_eq!(config.sync.past_days, 7);
        assert_eq!(config.palette.owners.get("user-b").map(String::as_str), Some("#ef5350"));
        assert_eq!(config.profiles.get("user-a").map(String::as_str), Some("Alex"));
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid toml";
        let result = Config::from_toml(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn saved_config_loads_back_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.session.user_id = "user-a".to_string();
        config.palette.owners.insert("user-a".to_string(), "#4cafef".to_string());

        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }
}
