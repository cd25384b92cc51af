//! HTTP adapter for the analysis collaborator.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{AnalysisClient, DocumentBundle};
use crate::{Error, Result};

/// Document name used when the collaborator answers with bare text.
const BARE_TEXT_DOCUMENT: &str = "README.md";

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    repo_path: &'a str,
}

/// Talks to `POST {base_url}/analyze`.
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    client: Client,
    endpoint: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build analysis HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/analyze", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Turn whatever the collaborator sent into documents.
///
/// Accepted shapes: `{"documents": {name: body}}`, `{name: body}`, or a bare
/// JSON string (one `README.md`).
pub fn normalize_response(body: Value) -> Result<DocumentBundle> {
    fn from_object(map: serde_json::Map<String, Value>) -> Result<DocumentBundle> {
        map.into_iter()
            .map(|(name, value)| match value {
                Value::String(text) => Ok((name, text)),
                other => Err(Error::Analysis(format!(
                    "document '{}' is not text (got {})",
                    name,
                    json_kind(&other)
                ))),
            })
            .collect()
    }

    match body {
        Value::Object(mut map) => match map.remove("documents") {
            Some(Value::Object(documents)) => from_object(documents),
            Some(other) => {
                // A document literally named "documents".
                map.insert("documents".to_string(), other);
                from_object(map)
            }
            None => from_object(map),
        },
        Value::String(text) => Ok([(BARE_TEXT_DOCUMENT, text)].into_iter().collect()),
        other => Err(Error::Analysis(format!(
            "unexpected response shape: {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Pull a readable reason out of an error body (`{"detail": ...}` or text).
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.trim().chars().take(500).collect())
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, repo_path: &Path) -> Result<DocumentBundle> {
        let repo_path = repo_path.to_string_lossy();
        debug!(endpoint = %self.endpoint, repo_path = %repo_path, "Requesting analysis");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest {
                repo_path: &repo_path,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Analysis(format!("analysis timed out: {}", e))
                } else {
                    Error::Analysis(format!("analysis request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Analysis(format!(
                "Agent error ({}): {}",
                status.as_u16(),
                error_detail(&body)
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Analysis(format!("invalid analysis response: {}", e)))?;
        normalize_response(body)
    }
}
