use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use common::StorageParameters;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_CLEANUP_PERIOD: u64 = 60;
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9000";

#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

/// Observes the fleet running in a cluster and stores its topology
#[derive(Parser, Deserialize, Clone, Debug, Default)]
#[command(version, about)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameters {
    /// YAML configuration files, later files override earlier ones and flags override them all
    #[arg(long = "config", env = "CONFIG", value_delimiter = ',')]
    #[serde(skip)]
    pub config: Vec<PathBuf>,
    /// Seconds between two cleanup passes [default: 60]
    #[arg(long, env = "CLEANUP_PERIOD")]
    pub cleanup_period: Option<u64>,
    /// Address of the health and metrics server [default: 0.0.0.0:9000]
    #[arg(long, env = "LISTEN_ADDRESS")]
    pub listen: Option<String>,
    /// Log output format [default: console]
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
    #[command(flatten)]
    #[serde(flatten)]
    pub storage: StorageParameters,
}

/// Effective configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub cleanup_period: Duration,
    pub listen: String,
    pub log_format: LogFormat,
    pub storage: StorageParameters,
}

impl Parameters {
    fn or(self, fallback: Parameters) -> Self {
        Self {
            config: self.config,
            cleanup_period: self.cleanup_period.or(fallback.cleanup_period),
            listen: self.listen.or(fallback.listen),
            log_format: self.log_format.or(fallback.log_format),
            storage: self.storage.or(fallback.storage),
        }
    }

    fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&content).map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))
    }

    /// Layers the configuration files under the flags and fills in the defaults
    pub fn load(self) -> Result<Settings> {
        let mut files = Parameters::default();
        for path in &self.config {
            files = Parameters::from_file(path)?.or(files);
        }
        let merged = self.or(files);
        Ok(Settings {
            cleanup_period: Duration::from_secs(merged.cleanup_period.unwrap_or(DEFAULT_CLEANUP_PERIOD)),
            listen: merged.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            log_format: merged.log_format.unwrap_or_default(),
            storage: merged.storage,
        })
    }
}
