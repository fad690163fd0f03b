use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{GroupBy, Protocol, Provider, QualityPreference};
use crate::error::FastqDlError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "fastq-dl.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub provider: Provider,
    pub protocol: Protocol,
    pub outdir: PathBuf,
    pub prefix: String,
    pub max_attempts: u32,
    /// Seconds between attempts.
    pub sleep: u64,
    pub cpus: u32,
    pub force: bool,
    pub ignore_checksum: bool,
    pub sra_lite: bool,
    pub only_provider: bool,
    pub only_download_metadata: bool,
    pub group_by: Option<GroupBy>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::Ena,
            protocol: Protocol::Ftp,
            outdir: PathBuf::from("./"),
            prefix: "fastq".to_string(),
            max_attempts: 10,
            sleep: 10,
            cpus: 1,
            force: false,
            ignore_checksum: false,
            sra_lite: false,
            only_provider: false,
            only_download_metadata: false,
            group_by: None,
        }
    }
}

impl Settings {
    /// Clamps counts that must be at least one.
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.cpus = self.cpus.max(1);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.sleep))
    }

    pub fn quality(&self) -> QualityPreference {
        if self.sra_lite {
            QualityPreference::Lite
        } else {
            QualityPreference::Normalized
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads settings from `path`, or from `./fastq-dl.json` when that exists,
    /// or falls back to the defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Settings, FastqDlError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FastqDlError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Settings, FastqDlError> {
        let settings: Settings = serde_json::from_str(content)
            .map_err(|err| FastqDlError::ConfigParse(err.to_string()))?;
        Ok(settings.normalized())
    }
}
