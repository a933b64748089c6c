//! Elasticsearch-compatible HTTP transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use offering_types::{SearchDocument, SearchSettings};

use crate::error::{SearchError, TransportError};
use crate::transport::{BulkItemOutcome, ClusterHealth, SearchTransport};

const READ_ONLY_SETTING: &str = "index.blocks.read_only_allow_delete";

/// Error envelope returned by the store on failed requests.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: EsError,
}

#[derive(Debug, Deserialize)]
struct EsError {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(rename = "_id")]
    id: String,
    status: u16,
    #[serde(default)]
    error: Option<EsError>,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    doc: &'a SearchDocument,
    doc_as_upsert: bool,
}

/// [`SearchTransport`] over the Elasticsearch REST API.
pub struct ElasticsearchTransport {
    client: Client,
    base_url: String,
}

impl ElasticsearchTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &SearchSettings) -> Result<Self, SearchError> {
        Self::new(
            settings.url.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        request.send().await.map_err(request_error)
    }

    /// Send and turn non-2xx responses into classified errors.
    async fn send_ok(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = self.send(request).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Permanent {
            status: e.status().map(|s| s.as_u16()),
            reason: e.to_string(),
        }
    }
}

async fn error_from_response(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => classify(status, &envelope.error),
        Err(_) => TransportError::classify(status, "http_error", &body),
    }
}

fn classify(status: u16, error: &EsError) -> TransportError {
    TransportError::classify(
        status,
        &error.error_type,
        error.reason.as_deref().unwrap_or_default(),
    )
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response.json().await.map_err(|e| TransportError::Permanent {
        status: None,
        reason: format!("unreadable response: {}", e),
    })
}

/// Setting values come back as strings with flat settings, but accept booleans too.
fn setting_is_true(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Encode documents as `update` actions with `doc_as_upsert`.
pub fn bulk_body(index: &str, docs: &[SearchDocument]) -> Result<String, TransportError> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "update": { "_index": index, "_id": doc.id } });
        let source = UpsertBody {
            doc,
            doc_as_upsert: true,
        };
        let source = serde_json::to_string(&source).map_err(|e| TransportError::Permanent {
            status: None,
            reason: format!("unserializable document {}: {}", doc.id, e),
        })?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl SearchTransport for ElasticsearchTransport {
    async fn index_exists(&self, index: &str) -> Result<bool, TransportError> {
        let response = self.send(self.client.head(self.url(index))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn get_mapping(&self, index: &str) -> Result<Value, TransportError> {
        let response = self
            .send_ok(self.client.get(self.url(&format!("{}/_mapping", index))))
            .await?;
        let body: Value = parse_json(response).await?;
        Ok(body
            .get(index)
            .and_then(|i| i.get("mappings"))
            .and_then(|m| m.get("properties"))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), TransportError> {
        let response = self
            .send(self.client.put(self.url(index)).json(body))
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        match error_from_response(response).await {
            TransportError::Permanent { reason, .. }
                if reason.starts_with("resource_already_exists_exception") =>
            {
                debug!(index, "Index created concurrently");
                Ok(())
            }
            other => Err(other),
        }
    }

    async fn upsert(&self, index: &str, doc: &SearchDocument) -> Result<(), TransportError> {
        let body = UpsertBody {
            doc,
            doc_as_upsert: true,
        };
        self.send_ok(
            self.client
                .post(self.url(&format!("{}/_update/{}", index, doc.id)))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[SearchDocument],
    ) -> Result<Vec<BulkItemOutcome>, TransportError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let body = bulk_body(index, docs)?;
        let response = self
            .send_ok(
                self.client
                    .post(self.url("_bulk"))
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        let parsed: BulkResponse = parse_json(response).await?;

        let outcomes = parsed
            .items
            .into_iter()
            .flat_map(|item| item.into_values())
            .map(|item| match item.error {
                Some(error) => BulkItemOutcome::failed(item.id, classify(item.status, &error)),
                None if (200..300).contains(&item.status) => BulkItemOutcome::ok(item.id),
                None => BulkItemOutcome::failed(
                    item.id,
                    TransportError::classify(item.status, "bulk_item_error", "no error detail"),
                ),
            })
            .collect();
        Ok(outcomes)
    }

    async fn delete(&self, index: &str, id: &str) -> Result<(), TransportError> {
        let response = self
            .send(self.client.delete(self.url(&format!("{}/_doc/{}", index, id))))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn read_only_block(&self, index: &str) -> Result<bool, TransportError> {
        let response = self
            .send_ok(
                self.client
                    .get(self.url(&format!("{}/_settings", index)))
                    .query(&[("flat_settings", "true")]),
            )
            .await?;
        let body: Value = parse_json(response).await?;
        Ok(setting_is_true(
            body.get(index)
                .and_then(|i| i.get("settings"))
                .and_then(|s| s.get(READ_ONLY_SETTING)),
        ))
    }

    async fn clear_read_only_block(&self, index: &str) -> Result<(), TransportError> {
        let body = json!({ READ_ONLY_SETTING: null });
        self.send_ok(
            self.client
                .put(self.url(&format!("{}/_settings", index)))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn cluster_health(&self) -> Result<ClusterHealth, TransportError> {
        let response = self
            .send_ok(self.client.get(self.url("_cluster/health")))
            .await?;
        parse_json(response).await
    }

    async fn reroute_retry_failed(&self) -> Result<(), TransportError> {
        self.send_ok(
            self.client
                .post(self.url("_cluster/reroute"))
                .query(&[("retry_failed", "true")]),
        )
        .await?;
        Ok(())
    }
}
