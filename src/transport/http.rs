//! PostgREST-style HTTP transport
//!
//! One `HttpTransport` per configured endpoint. Auth is a bearer token plus
//! the `apikey` header the backend expects on every call.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::ClientError;
use crate::transport::{Method, QueryRequest, Row, Transport};

pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_ms: request_timeout.as_millis() as u64,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_request_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout_ms)
        } else {
            ClientError::transport(format!("request to {} failed: {err}", self.base_url))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Row>, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };

        builder = builder
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            // Writes echo the affected rows so callers get ids and
            // server-side defaults back.
            .header("Prefer", "return=representation")
            .query(&request.params);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            // A 400 means the rendered query itself was rejected; that is a
            // caller bug, not a transient condition.
            if status == StatusCode::BAD_REQUEST {
                return Err(ClientError::Validation(format!(
                    "backend rejected query: {detail}"
                )));
            }
            return Err(ClientError::Transport {
                message: format!("backend returned {status}: {detail}"),
                status: Some(status.as_u16()),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;
        if text.is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Array(rows)) => Ok(rows),
            // Single-object responses (e.g. RPC style) are wrapped so the
            // caller always sees rows.
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(ClientError::transport(format!(
                "unparseable backend response: {e}"
            ))),
        }
    }

    async fn health_check(&self) -> Result<(), ClientError> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self
            .client
            .head(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if response.status().is_server_error() {
            return Err(ClientError::Transport {
                message: format!("health probe returned {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }
        Ok(())
    }
}
