//! Alertmanager sink posting to the v2 alerts endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SinkError;
use crate::message::{AnnotationSet, LabelSet, Message};
use crate::sink::{parse_payload, Sink};

pub const SINK_TYPE: &str = "alertmanager";

/// Label carrying the alert name
pub const ALERTNAME_LABEL: &str = "alertname";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// `host[:port]` of the Alertmanager
    pub host: String,

    #[serde(default = "default_base_path")]
    pub base_path: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_base_path() -> String {
    "/api/v2".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Wire form of one postable alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostableAlert {
    pub labels: LabelSet,

    #[serde(default)]
    pub annotations: AnnotationSet,
}

impl PostableAlert {
    /// Map a message onto an alert, naming it after the job when the
    /// `alertname` label is absent or empty.
    pub fn from_message(message: &Message) -> Self {
        let mut labels = message.labels.clone();
        if message.label(ALERTNAME_LABEL).is_none() {
            labels.insert(ALERTNAME_LABEL.to_string(), message.id.clone());
        }

        Self {
            labels,
            annotations: message.annotations.clone(),
        }
    }
}

pub struct Client {
    url: String,
    http: reqwest::Client,
}

/// Registry constructor for [`SINK_TYPE`]
pub fn build(payload: Value) -> Result<Box<dyn Sink>, SinkError> {
    let config: ClientConfig = parse_payload(SINK_TYPE, payload)?;
    Ok(Box::new(Client::new(config)?))
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            url: alerts_url(&config),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn alerts_url(config: &ClientConfig) -> String {
    let base = config.base_path.trim_matches('/');
    if base.is_empty() {
        format!("{}://{}/alerts", config.scheme, config.host)
    } else {
        format!("{}://{}/{}/alerts", config.scheme, config.host, base)
    }
}

#[async_trait]
impl Sink for Client {
    async fn send(&self, message: &Message) -> Result<(), SinkError> {
        let alerts = [PostableAlert::from_message(message)];

        let response = self.http.post(&self.url).json(&alerts).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(id = %message.id, url = %self.url, "alert posted");
        Ok(())
    }
}
