#![forbid(unsafe_code)]

//! Runtime configuration. Parses a TOML file into a strongly-typed structure;
//! every field has a default so an empty file is valid.

use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use crate::TesterError;

/// Primary configuration structure for a tester run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    /// Logging verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,

    /// Upper bound for the setup and running phases of a single case.
    #[serde(with = "humantime_serde", default = "default_case_timeout")]
    pub case_timeout: Duration,

    /// Only run cases whose name starts with this prefix.
    pub prefix: Option<String>,

    /// Only run cases whose name contains this string.
    pub substring: Option<String>,

    /// Capability switches of the simulated environment.
    pub simulator: SimulatorConfig,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            case_timeout: default_case_timeout(),
            prefix: None,
            substring: None,
            simulator: SimulatorConfig::default(),
        }
    }
}

fn default_case_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Which optional socket capabilities the simulated local stack advertises.
/// Switching one off makes the matching option fail with `ENOPROTOOPT`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatorConfig {
    pub ecred_supported: bool,
    pub timestamping_supported: bool,
    pub ts_info_supported: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            ecred_supported: true,
            timestamping_supported: true,
            ts_info_supported: true,
        }
    }
}

impl TesterConfig {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::TesterResult<Self> {
        let data = fs::read_to_string(&path).map_err(TesterError::from)?;
        let cfg = toml::from_str::<TesterConfig>(&data).map_err(TesterError::ConfigParse)?;
        Ok(cfg)
    }

    /// Load config alias version
    pub fn load<P: AsRef<Path>>(path: P) -> crate::TesterResult<Self> {
        Self::from_file(path)
    }

    /// Whether a case with this name passes the configured filters.
    pub fn selects(&self, name: &str) -> bool {
        let prefix_ok = self.prefix.as_deref().map_or(true, |p| name.starts_with(p));
        let substring_ok = self.substring.as_deref().map_or(true, |s| name.contains(s));
        prefix_ok && substring_ok
    }
}
