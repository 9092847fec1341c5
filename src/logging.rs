//! Structured log setup.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::error::LogError;

/// Log section of the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`. `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Empty or `stdout`, `stderr`, or a file path appended to
    pub output_path: String,

    /// `json` or `text`
    pub output_type: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            output_path: String::new(),
            output_type: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Json,
    Text,
}

impl LogConfig {
    pub fn level(&self) -> Result<LevelFilter, LogError> {
        if self.log_level.is_empty() {
            return Ok(LevelFilter::INFO);
        }
        self.log_level
            .parse()
            .map_err(|_| LogError::Level(self.log_level.clone()))
    }

    pub fn output_type(&self) -> Result<OutputType, LogError> {
        match self.output_type.to_ascii_lowercase().as_str() {
            "" | "json" => Ok(OutputType::Json),
            "text" => Ok(OutputType::Text),
            other => Err(LogError::OutputType(other.to_string())),
        }
    }

    fn writer(&self) -> Result<BoxMakeWriter, LogError> {
        match self.output_path.as_str() {
            "" | "stdout" => Ok(BoxMakeWriter::new(std::io::stdout)),
            "stderr" => Ok(BoxMakeWriter::new(std::io::stderr)),
            path => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LogError::Output {
                        path: PathBuf::from(path),
                        source,
                    })?;
                Ok(BoxMakeWriter::new(Mutex::new(file)))
            }
        }
    }
}

/// Install the global subscriber described by `config`.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level()?.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(config.writer()?)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    let result = match config.output_type()? {
        // flattened so the message sits next to the fields
        OutputType::Json => builder.json().flatten_event(true).try_init(),
        OutputType::Text => builder.try_init(),
    };

    result.map_err(|e| LogError::Install(e.to_string()))
}
