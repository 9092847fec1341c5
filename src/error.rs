//! Error types shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Error raised while parsing a label path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path index")]
    Empty,
}

/// Error raised while loading the application configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid job '{name}': {reason}")]
    InvalidJob { name: String, reason: String },
}

/// Error raised by a source backend
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid source type {0}")]
    UnknownType(String),
    #[error("invalid {kind} source config: {source}")]
    InvalidConfig {
        kind: String,
        source: serde_json::Error,
    },
    #[error("source does not support {0} fetch")]
    Unsupported(&'static str),
    #[error("failed to search: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to search [{status}]: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Error raised by a sink backend or its hand-off queue
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid sink type {0}")]
    UnknownType(String),
    #[error("invalid {kind} sink config: {source}")]
    InvalidConfig {
        kind: String,
        source: serde_json::Error,
    },
    #[error("failed to deliver alert: {0}")]
    Request(#[from] reqwest::Error),
    #[error("receiver returned [{status}]: {body}")]
    Rejected { status: u16, body: String },
    #[error("sink '{0}' is no longer accepting messages")]
    Closed(String),
}

/// Error raised while building or running a job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to build field extractor: {0}")]
    Extractor(#[source] PathError),
    #[error("failed to build source: {0}")]
    Source(#[source] SourceError),
    #[error("unknown job type {0}")]
    UnknownType(String),
    #[error("fetch failed: {0}")]
    Fetch(#[source] SourceError),
    #[error("extraction failed: {0}")]
    Extract(String),
    #[error("send to sink '{sink}' failed: {source}")]
    Send { sink: String, source: SinkError },
}

/// Error raised while installing the log subscriber
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log level '{0}'")]
    Level(String),
    #[error("invalid log output type '{0}'")]
    OutputType(String),
    #[error("failed to open log output {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Error that aborts startup before the signal wait begins
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to start sink: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to start job '{name}': {source}")]
    Job { name: String, source: JobError },
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}
