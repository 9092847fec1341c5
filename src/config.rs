//! Application configuration loading.
//!
//! The configuration is a single JSON document (YAML is accepted for `.yaml`
//! and `.yml` files) with a log section, the named sinks and the job list.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::sink::SinkConfig;
use crate::source::SourceConfig;

/// Longest accepted tick interval, in seconds (one year)
pub const MAX_DURATION_SECS: u64 = 366 * 24 * 60 * 60;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,

    /// Sink name -> sink configuration
    #[serde(default)]
    pub sink: IndexMap<String, SinkConfig>,

    #[serde(default)]
    pub job: Vec<JobConfig>,
}

/// One polling job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub name: String,

    /// Tick interval in seconds
    pub duration: u64,

    /// Label name -> path into the fetched document
    #[serde(default)]
    pub labels: IndexMap<String, String>,

    /// Constant labels added to every message
    #[serde(default)]
    pub static_labels: IndexMap<String, String>,

    /// Annotation name -> template over the labels
    #[serde(default, alias = "annotation")]
    pub annotations: IndexMap<String, String>,

    /// `batch` or `stream`; checked when the job ticks
    #[serde(rename = "type")]
    pub job_type: String,

    pub source: SourceConfig,

    /// Names of the sinks messages are forwarded to
    #[serde(default)]
    pub sink: Vec<String>,
}

impl AppConfig {
    /// Load configuration from a file.
    ///
    /// # Errors
    /// Returns error if the file can't be read, doesn't parse, or a job is
    /// invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            Self::from_yaml_str(&contents)
        } else {
            Self::from_json_str(&contents)
        }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check job names are unique and intervals are between one second and
    /// [`MAX_DURATION_SECS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for job in &self.job {
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigError::InvalidJob {
                    name: job.name.clone(),
                    reason: "duplicate job name".to_string(),
                });
            }
            if job.duration == 0 {
                return Err(ConfigError::InvalidJob {
                    name: job.name.clone(),
                    reason: "duration must be at least one second".to_string(),
                });
            }
            if job.duration > MAX_DURATION_SECS {
                return Err(ConfigError::InvalidJob {
                    name: job.name.clone(),
                    reason: format!("duration must be at most {MAX_DURATION_SECS} seconds"),
                });
            }
        }

        Ok(())
    }

    pub fn get_job(&self, name: &str) -> Option<&JobConfig> {
        self.job.iter().find(|j| j.name == name)
    }
}
