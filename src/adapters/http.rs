use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::DispatchError;
use crate::executor::Adapter;
use crate::models::{Completion, Request};

// Minimal body the adapter understands: any JSON object carrying a
// `content` string, optionally naming the model that produced it.
#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    content: String,
}

/// Vendor-agnostic JSON-over-HTTP adapter.
///
/// Posts the canonical request as JSON to a single endpoint with optional
/// bearer auth. Anything vendor-specific (paths, payload reshaping,
/// response unwrapping) belongs in a dedicated `Adapter` implementation;
/// this one is the lowest common denominator and the reference for
/// writing those.
pub struct HttpAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    async fn send(&self, request: &Request) -> Result<Completion, DispatchError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: CompletionBody = response.json().await.map_err(classify_reqwest)?;
        Ok(Completion {
            model: body.model.unwrap_or_else(|| request.model.clone()),
            content: body.content,
        })
    }
}

fn classify_reqwest(err: reqwest::Error) -> DispatchError {
    if err.is_decode() {
        DispatchError::Permanent(format!("unparseable response: {err}"))
    } else {
        // connect failures, resets, proxy trouble: all worth a retry
        DispatchError::Transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> DispatchError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("{status}: {snippet}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DispatchError::Transient(detail)
    } else {
        DispatchError::Permanent(detail)
    }
}
