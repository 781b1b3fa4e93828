use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("couldn't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no config directory: {0}")]
    BaseDirs(#[from] xdg::BaseDirectoriesError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Name of the user commands act on behalf of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user: Option<String>,
}

fn default_database_url() -> String {
    "sqlite:feedloop.db?mode=rwc".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            current_user: None,
        }
    }
}

impl Config {
    /// Load config from `path`; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Record `name` as the current user and save immediately.
    pub fn set_user<P: AsRef<Path>>(&mut self, name: &str, path: P) -> Result<(), ConfigError> {
        self.current_user = Some(name.to_string());
        self.save(path)
    }

    /// Default location: `$XDG_CONFIG_HOME/feedloop/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = xdg::BaseDirectories::with_prefix("feedloop")?;
        dirs.place_config_file(CONFIG_FILE_NAME)
            .map_err(|source| ConfigError::Io {
                path: dirs.get_config_home(),
                source,
            })
    }
}
