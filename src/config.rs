//! Engine configuration - YAML file with defaults
//!
//! Looked up as `./bioflow.yml`, then `~/.bioflow/config.yml`. Credentials are
//! never read from here.

use crate::catalog::{CatalogError, StaticCatalog};
use crate::remote::{resolve_encoding, SshSettings};
use crate::report::REPORTS_DIR;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const LOCAL_CONFIG: &str = "bioflow.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Encoding label of remote output and text files
    pub encoding: String,
    /// Remote directory where tool outputs are written
    pub work_dir: String,
    /// Wrapper applied to tools without their own, e.g. `source ~/.bashrc && __COMMAND__`
    pub env_wrapper: Option<String>,
    pub connect_timeout_secs: u64,
    /// Tool catalog file (YAML or JSON)
    pub catalog: Option<PathBuf>,
    pub reports_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            work_dir: "/tmp/bioflow".to_string(),
            env_wrapper: None,
            connect_timeout_secs: 10,
            catalog: None,
            reports_dir: PathBuf::from(REPORTS_DIR),
        }
    }
}

impl EngineConfig {
    /// Load config from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        // An empty file means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Load the first config file found, or defaults
    pub fn auto_load() -> Result<Self, ConfigError> {
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::from_file(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user = home.join(".bioflow").join("config.yml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Resolve the configured text encoding
    pub fn encoding(&self) -> Result<&'static Encoding, ConfigError> {
        resolve_encoding(&self.encoding).ok_or_else(|| ConfigError::UnknownEncoding(self.encoding.clone()))
    }

    /// SSH settings derived from this config
    pub fn ssh_settings(&self) -> Result<SshSettings, ConfigError> {
        Ok(SshSettings {
            encoding: self.encoding()?,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }

    /// The configured catalog, or an empty one
    pub fn load_catalog(&self) -> Result<StaticCatalog, CatalogError> {
        match &self.catalog {
            Some(path) => StaticCatalog::from_file(path),
            None => Ok(StaticCatalog::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "work_dir: /scratch/runs\nencoding: latin1").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.work_dir, "/scratch/runs");
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.encoding().unwrap(), encoding_rs::WINDOWS_1252);
        assert!(config.load_catalog().unwrap().is_empty());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(EngineConfig::from_file(file.path()).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_unknown_encoding() {
        let config = EngineConfig {
            encoding: "klingon".into(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.encoding(), Err(ConfigError::UnknownEncoding(_))));
        assert!(config.ssh_settings().is_err());
    }

    #[test]
    fn test_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connect_timeout_secs: [not, a, number]").unwrap();
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
