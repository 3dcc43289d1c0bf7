use crate::app::error::Result;
use config::{Config, Environment, File};
use serde_derive::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "MORTAR";
pub const DEFAULT_SETTINGS_FILE: &str = "mortar";

/// Runner settings, kept apart from the suite file.
///
/// Keys are case-insensitive, so database and role names end up lowercase.
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(
        default = "default_request_timeout",
        with = "crate::configuration::deserialize::duration"
    )]
    pub request_timeout: Duration,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    pub case_timeout: Option<Duration>,
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Role name to an alternative file, e.g. a read replica.
    #[serde(default)]
    pub roles: HashMap<String, PathBuf>,
    #[serde(default)]
    pub read_only: bool,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: None,
            request_timeout: default_request_timeout(),
            case_timeout: None,
            report: None,
            databases: HashMap::new(),
        }
    }
}

impl Settings {
    /// Reads the given file, or an optional `mortar.{toml,yaml,json}` from the
    /// working directory, then `MORTAR_*` environment variables on top.
    pub fn from(file: Option<&Path>) -> Result<Self> {
        let mut config = Config::new();
        match file {
            Some(path) => config.merge(File::from(path))?,
            None => config.merge(File::with_name(DEFAULT_SETTINGS_FILE).required(false))?,
        };
        config.merge(Environment::with_prefix(ENV_PREFIX).separator("__"))?;
        Ok(config.try_into()?)
    }
}
