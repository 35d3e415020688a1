//! Settings a caller can persist rather than pass on every call

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Runner};

/// How runs should be configured.
///
/// An unset limit means "as many as the rayon pool has threads", decided
/// when [`Config::runner`] is called.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Config {
    pub fn with_max_concurrency(max: usize) -> Config {
        Config {
            max_concurrency: Some(max),
        }
    }

    /// Read a config from a yaml file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let yml = fs::read_to_string(path).map_err(|source| ConfigError::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&yml)?;
        if config.max_concurrency == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        log::debug!("Loaded {config:?} from {path:?}");
        Ok(config)
    }

    /// Write this config as yaml.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, serde_yaml::to_string(self)?).map_err(|source| ConfigError::FileIo {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn runner(&self) -> Runner {
        match self.max_concurrency {
            Some(max) => Runner::with_max_concurrency(max),
            None => Runner::new(),
        }
    }
}
