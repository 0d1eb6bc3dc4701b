//! Elasticsearch bulk sink
//!
//! Writes batches through the `_bulk` endpoint as NDJSON `index` actions,
//! one per document, addressed by the document's range identifier.

use async_trait::async_trait;
use geoip_common::types::Document;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{CommitReport, DocumentSink, ItemFailure};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};

/// Bulk-indexes documents into one index of a search cluster
pub struct ElasticsearchSink {
    client: Client,
    base_url: String,
    index: String,
    doc_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Document,
}

impl ElasticsearchSink {
    /// Create a sink for `index` on the cluster at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        index: impl Into<String>,
        doc_type: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
            doc_type,
        })
    }

    /// Create from a validated ingestion configuration
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Self::new(
            config.url.clone(),
            config.index.clone(),
            config.doc_type.clone(),
            config.request_timeout(),
        )
    }

    /// Check that the cluster answers before any stage starts
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| IngestError::sink_unavailable(&self.base_url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::sink_unavailable(
                &self.base_url,
                format!("cluster answered {}", response.status()),
            ));
        }

        info!(url = %self.base_url, index = %self.index, "Connected to search cluster");
        Ok(())
    }

    /// Find the ranges containing `ip`
    pub async fn lookup_ip(&self, ip: &str) -> Result<Vec<Document>> {
        let body = json!({ "query": { "term": { "ip_address": ip } } });

        let response = self
            .client
            .post(format!("{}/{}/_search", self.base_url, self.index))
            .json(&body)
            .send()
            .await
            .map_err(|e| IngestError::Query(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::Query(format!("search returned {}: {}", status, text)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Query(format!("unreadable search response: {}", e)))?;

        Ok(parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| Document {
                id: hit.id,
                ..hit.source
            })
            .collect())
    }

    /// Encode a batch as a `_bulk` NDJSON body
    pub fn encode_bulk(&self, batch: &[Document]) -> Result<String> {
        let mut body = String::new();

        for doc in batch {
            let mut action = serde_json::Map::new();
            action.insert("_id".to_string(), json!(doc.id));
            if let Some(doc_type) = &self.doc_type {
                action.insert("_type".to_string(), json!(doc_type));
            }

            let action = serde_json::to_string(&json!({ "index": action }))
                .map_err(|e| IngestError::sink_commit(batch.len(), e.to_string()))?;
            let source = serde_json::to_string(doc)
                .map_err(|e| IngestError::sink_commit(batch.len(), e.to_string()))?;

            body.push_str(&action);
            body.push('\n');
            body.push_str(&source);
            body.push('\n');
        }

        Ok(body)
    }
}

fn item_failures(response: BulkResponse) -> (usize, Vec<ItemFailure>) {
    let mut indexed = 0;
    let mut failures = Vec::new();

    for item in response.items.into_iter().flat_map(HashMap::into_values) {
        if item.error.is_none() && item.status < 300 {
            indexed += 1;
            continue;
        }

        let reason = match &item.error {
            Some(serde_json::Value::Object(err)) => err
                .get("reason")
                .and_then(|r| r.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| serde_json::Value::Object(err.clone()).to_string()),
            Some(other) => other.to_string(),
            None => format!("status {}", item.status),
        };

        failures.push(ItemFailure {
            id: item.id.unwrap_or_default(),
            status: item.status,
            reason,
        });
    }

    if response.errors && failures.is_empty() {
        failures.push(ItemFailure {
            id: String::new(),
            status: 0,
            reason: "bulk response reported errors".to_string(),
        });
    }

    (indexed, failures)
}

/// Every document in the request must be accounted for by exactly one item
fn commit_report(response: BulkResponse, batch_len: usize) -> Result<CommitReport> {
    let (indexed, failures) = item_failures(response);
    let acknowledged = indexed + failures.len();

    if acknowledged != batch_len {
        return Err(IngestError::sink_commit(
            batch_len,
            format!("bulk response acknowledged {} of {} documents", acknowledged, batch_len),
        ));
    }

    Ok(CommitReport { indexed, failures })
}

#[async_trait]
impl DocumentSink for ElasticsearchSink {
    async fn commit(&self, batch: &[Document]) -> Result<CommitReport> {
        let body = self.encode_bulk(batch)?;

        let response = self
            .client
            .post(format!("{}/{}/_bulk", self.base_url, self.index))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| IngestError::sink_commit(batch.len(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(%status, "Bulk request rejected");
            return Err(IngestError::sink_commit(
                batch.len(),
                format!("bulk endpoint returned {}: {}", status, text),
            ));
        }

        let parsed: BulkResponse = response.json().await.map_err(|e| {
            IngestError::sink_commit(batch.len(), format!("unreadable bulk response: {}", e))
        })?;

        let report = commit_report(parsed, batch.len())?;
        debug!(indexed = report.indexed, failed = report.failures.len(), "Bulk request finished");

        Ok(report)
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}
