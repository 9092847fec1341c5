//! Elasticsearch search source.
//!
//! Both fetch modes run the configured query restricted to the job window on
//! `timeField`. Stream mode returns each hit's `_source`; batch mode returns
//! the hit count and any aggregations as one document.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SourceError;
use crate::job::JobWindow;
use crate::message::Record;
use crate::source::{parse_payload, Source};

pub const SOURCE_TYPE: &str = "elasticsearch";

/// Backend payload of an `elasticsearch` source
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the cluster, e.g. `http://localhost:9200`
    pub address: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Index or index pattern searched
    pub index: String,

    /// Query clause combined with the time range
    #[serde(default = "default_query")]
    pub query: Value,

    /// Full request body used instead of the generated one. `{{from}}` and
    /// `{{now}}` are replaced with the window bounds.
    #[serde(default)]
    pub time_query: String,

    #[serde(default = "default_time_field")]
    pub time_field: String,

    /// Maximum number of hits per window
    #[serde(default = "default_max")]
    pub max: usize,
}

fn default_query() -> Value {
    json!({"match_all": {}})
}

fn default_time_field() -> String {
    "@timestamp".to_string()
}

fn default_max() -> usize {
    10
}

pub struct Client {
    config: Config,
    http: reqwest::Client,
}

/// Registry constructor for [`SOURCE_TYPE`]
pub fn build(payload: Value) -> Result<Box<dyn Source>, SourceError> {
    let config: Config = parse_payload(SOURCE_TYPE, payload)?;
    Ok(Box::new(Client::new(config)?))
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Client {
    pub fn new(config: Config) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { config, http })
    }

    /// Request body for the window.
    pub fn search_body(&self, window: &JobWindow) -> Result<Value, SourceError> {
        let from = format_time(&window.from);
        let now = format_time(&window.now);

        if !self.config.time_query.is_empty() {
            let body = self
                .config
                .time_query
                .replace("{{from}}", &from)
                .replace("{{now}}", &now);
            return serde_json::from_str(&body)
                .map_err(|e| SourceError::Decode(format!("invalid timeQuery: {e}")));
        }

        let mut range = serde_json::Map::new();
        range.insert(
            self.config.time_field.clone(),
            json!({
                "format": "strict_date_optional_time",
                "gte": from,
                "lt": now,
            }),
        );

        Ok(json!({
            "query": {
                "bool": {
                    "must": [self.config.query, {"range": range}]
                }
            }
        }))
    }

    async fn search(&self, body: &Value, size: usize) -> Result<Value, SourceError> {
        let url = format!(
            "{}/{}/_search",
            self.config.address.trim_end_matches('/'),
            self.config.index
        );
        tracing::debug!(url = %url, query = %body, "elasticsearch query");

        let mut request = self.http.post(&url).query(&[("size", size)]).json(body);
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Total hit count, accepting both the numeric and the `{"value": n}` forms.
fn total_hits(response: &Value) -> u64 {
    let total = &response["hits"]["total"];
    total
        .as_u64()
        .or_else(|| total["value"].as_u64())
        .unwrap_or(0)
}

/// `_source` of every hit, in response order.
fn hit_sources(response: &Value) -> Vec<Record> {
    response["hits"]["hits"]
        .as_array()
        .map(|hits| hits.iter().map(|hit| hit["_source"].clone()).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Source for Client {
    async fn fetch_one(&self, window: &JobWindow) -> Result<Option<Record>, SourceError> {
        let body = self.search_body(window)?;
        let response = self.search(&body, 0).await?;

        let total = total_hits(&response);
        if total == 0 {
            return Ok(None);
        }

        let aggregations = response
            .get("aggregations")
            .cloned()
            .unwrap_or_else(|| json!({}));

        Ok(Some(json!({"total": total, "aggregations": aggregations})))
    }

    async fn fetch_all(&self, window: &JobWindow) -> Result<Vec<Record>, SourceError> {
        let body = self.search_body(window)?;
        let response = self.search(&body, self.config.max).await?;
        Ok(hit_sources(&response))
    }
}
