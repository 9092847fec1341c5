//! Documents fetched from sources and the alert messages built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A raw record as returned by a source
pub type Record = serde_json::Value;

/// A record viewed as a key -> value mapping
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Flat label name -> text mapping
pub type LabelSet = BTreeMap<String, String>;

/// Flat annotation name -> rendered text mapping
pub type AnnotationSet = BTreeMap<String, String>;

/// Alert-shaped message forwarded to sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Name of the job that produced the message
    pub id: String,

    #[serde(default)]
    pub labels: LabelSet,

    #[serde(default)]
    pub annotations: AnnotationSet,
}

impl Message {
    pub fn new(id: impl Into<String>, labels: LabelSet, annotations: AnnotationSet) -> Self {
        Self {
            id: id.into(),
            labels,
            annotations,
        }
    }

    /// Label value, treating an empty string the same as an absent label.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
