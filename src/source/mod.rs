//! Data sources polled by jobs.
//!
//! A backend implements one or both fetch modes of [`Source`]. Backends are
//! looked up by their `sourceType` tag in a [`SourceRegistry`]; the opaque
//! `sourceConfig` payload is only parsed once the tag is known.

pub mod elasticsearch;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SourceError;
use crate::job::JobWindow;
use crate::message::Record;

/// A backend able to fetch documents for a time window.
#[async_trait]
pub trait Source: Send + Sync {
    /// Single aggregated result for the window, `None` when there is nothing
    /// to report.
    async fn fetch_one(&self, _window: &JobWindow) -> Result<Option<Record>, SourceError> {
        Err(SourceError::Unsupported("batch"))
    }

    /// Every matching record for the window, in backend order.
    async fn fetch_all(&self, _window: &JobWindow) -> Result<Vec<Record>, SourceError> {
        Err(SourceError::Unsupported("stream"))
    }
}

/// Tagged source configuration as it appears in a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub source_type: String,

    #[serde(default)]
    pub source_config: Value,
}

/// Builds a source from its backend specific payload
pub type SourceConstructor = fn(Value) -> Result<Box<dyn Source>, SourceError>;

/// Source type tag -> constructor
pub struct SourceRegistry {
    constructors: HashMap<String, SourceConstructor>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every built-in backend
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(elasticsearch::SOURCE_TYPE, elasticsearch::build);
        registry
    }

    pub fn register(&mut self, source_type: impl Into<String>, constructor: SourceConstructor) {
        self.constructors.insert(source_type.into(), constructor);
    }

    /// Resolve the tag and hand the payload to the matching constructor.
    pub fn build(&self, config: &SourceConfig) -> Result<Box<dyn Source>, SourceError> {
        let constructor = self
            .constructors
            .get(&config.source_type)
            .ok_or_else(|| SourceError::UnknownType(config.source_type.clone()))?;

        constructor(config.source_config.clone())
    }

    pub fn has_source(&self, source_type: &str) -> bool {
        self.constructors.contains_key(source_type)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Deserialize a backend payload, tagging errors with the backend kind.
pub fn parse_payload<T>(kind: &str, payload: Value) -> Result<T, SourceError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(payload).map_err(|source| SourceError::InvalidConfig {
        kind: kind.to_string(),
        source,
    })
}
