//! # Alert Fetcher: Scheduled Data-to-Alert Connector
//!
//! Alert Fetcher polls data sources on a fixed interval, extracts labeled
//! fields from every fetched record, renders annotations from those labels
//! and forwards the resulting alert to one or more sinks.
//!
//! ## Features
//!
//! - **Path extraction**: dotted label paths with quoted segments, e.g. `"kubernetes.pod".name`
//! - **Annotation templates**: handlebars templates over the extracted labels
//! - **Batch and stream jobs**: one aggregated record or every record per window
//! - **Pluggable backends**: sources and sinks are looked up by a type tag in a registry
//!
//! ## Example: Job configuration
//!
//! ```json
//! {
//!   "name": "error-logs",
//!   "duration": 60,
//!   "labels": {"host": "service.host", "level": "log.level"},
//!   "staticLabels": {"team": "infra"},
//!   "annotations": {"summary": "{{host}} logged at {{level}}"},
//!   "type": "stream",
//!   "source": {
//!     "sourceType": "elasticsearch",
//!     "sourceConfig": {"address": "http://localhost:9200", "index": "logs-*"}
//!   },
//!   "sink": ["alertmanager"]
//! }
//! ```

// Core pipeline
pub mod extraction;
pub mod annotation;
pub mod message;
pub mod job;

// Backends
pub mod source;
pub mod sink;

// Process plumbing
pub mod app;
pub mod config;
pub mod error;
pub mod logging;

// Re-export key types
pub use extraction::{resolve, FieldExtractor, PathIndex, MISSING_PLACEHOLDER};
pub use annotation::AnnotationRenderer;
pub use message::{AnnotationSet, Document, LabelSet, Message, Record};
pub use job::{Job, JobState, JobType, JobWindow};
pub use source::{Source, SourceConfig, SourceRegistry};
pub use sink::{Sink, SinkConfig, SinkHandle, SinkRegistry, SinkSet};
pub use config::{AppConfig, JobConfig};
pub use logging::LogConfig;
pub use error::{ConfigError, JobError, LogError, PathError, SinkError, SourceError, StartError};
