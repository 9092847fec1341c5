//! Delivery sinks and the hand-off queues that feed them.
//!
//! Every configured sink name gets exactly one backend instance and one
//! consuming task. Jobs never call a backend directly: they push messages
//! into the sink's [`SinkHandle`], which waits while the consumer is busy.

pub mod alertmanager;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SinkError;
use crate::message::Message;

/// Capacity of each hand-off queue. Kept at the minimum so a stalled sink
/// stalls its producers instead of piling up messages.
pub const HANDOFF_CAPACITY: usize = 1;

/// A delivery backend.
#[async_trait]
pub trait Sink: Send + Sync {
    /// One delivery attempt.
    async fn send(&self, message: &Message) -> Result<(), SinkError>;

    /// Drain `queue` until every sender is gone, delivering each message once.
    /// Failures are logged and the message is dropped.
    async fn consume(&self, name: &str, mut queue: mpsc::Receiver<Message>) {
        while let Some(message) = queue.recv().await {
            if let Err(err) = self.send(&message).await {
                tracing::warn!(sink = %name, id = %message.id, error = %err, "failed to send alert");
            }
        }
        tracing::debug!(sink = %name, "sink queue closed");
    }
}

/// Tagged sink configuration from the top-level `sink` mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    pub sink_type: String,

    #[serde(default)]
    pub sink_config: Value,
}

/// Builds a sink from its backend specific payload
pub type SinkConstructor = fn(Value) -> Result<Box<dyn Sink>, SinkError>;

/// Sink type tag -> constructor
pub struct SinkRegistry {
    constructors: HashMap<String, SinkConstructor>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every built-in backend
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(alertmanager::SINK_TYPE, alertmanager::build);
        registry
    }

    pub fn register(&mut self, sink_type: impl Into<String>, constructor: SinkConstructor) {
        self.constructors.insert(sink_type.into(), constructor);
    }

    pub fn build(&self, config: &SinkConfig) -> Result<Box<dyn Sink>, SinkError> {
        let constructor = self
            .constructors
            .get(&config.sink_type)
            .ok_or_else(|| SinkError::UnknownType(config.sink_type.clone()))?;

        constructor(config.sink_config.clone())
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Deserialize a backend payload, tagging errors with the backend kind.
pub fn parse_payload<T>(kind: &str, payload: Value) -> Result<T, SinkError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(payload).map_err(|source| SinkError::InvalidConfig {
        kind: kind.to_string(),
        source,
    })
}

/// Producer side of one sink's hand-off queue
#[derive(Debug, Clone)]
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<Message>,
}

impl SinkHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the consuming task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Hand a message to the sink's consumer, waiting until it has room.
    pub async fn send(&self, message: Message) -> Result<(), SinkError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SinkError::Closed(self.name.clone()))
    }
}

/// Every running sink, keyed by configured name.
///
/// Built once before any job starts and only read afterwards.
#[derive(Default)]
pub struct SinkSet {
    handles: HashMap<String, SinkHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl SinkSet {
    /// Build and start every configured sink. Must run inside a tokio runtime.
    pub fn start(
        configs: &IndexMap<String, SinkConfig>,
        registry: &SinkRegistry,
    ) -> Result<Self, SinkError> {
        let mut set = SinkSet::default();

        for (name, config) in configs {
            let sink = registry.build(config)?;
            set.attach(name.clone(), Arc::from(sink));
            tracing::info!(name = %name, sink_type = %config.sink_type, "sink init success");
        }

        Ok(set)
    }

    /// Start the consuming task for `sink` under `name`, replacing any
    /// previous sink of that name.
    pub fn attach(&mut self, name: impl Into<String>, sink: Arc<dyn Sink>) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);

        let task_name = name.clone();
        self.tasks.push(tokio::spawn(async move {
            sink.consume(&task_name, rx).await;
        }));

        self.handles.insert(name.clone(), SinkHandle { name, tx });
    }

    pub fn get(&self, name: &str) -> Option<&SinkHandle> {
        self.handles.get(name)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every queue and wait for the consumers to drain.
    pub async fn shutdown(self) {
        drop(self.handles);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
