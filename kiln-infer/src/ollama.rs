use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{InferenceClient, InferenceError};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<Value>,
}

/// HTTP client for an Ollama-compatible `/api` endpoint.
///
/// Model listing is a liveness probe and carries a short timeout; generation
/// has none, since it blocks for as long as the model takes.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn transport_error(e: reqwest::Error) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Http(e.to_string())
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String, InferenceError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(InferenceError::Status(status.as_u16()));
    }
    resp.text().await.map_err(transport_error)
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_body(resp).await?;

        let tags: TagsResponse = serde_json::from_str(&body)
            .map_err(|e| InferenceError::Payload(format!("invalid model listing: {e}")))?;
        let models: Vec<String> = tags
            .models
            .iter()
            .filter_map(|m| m.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        debug!(count = models.len(), "listed backend models");
        Ok(models)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
        let url = format!("{}/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let text = read_body(resp).await.map_err(|e| {
            warn!(model, error = %e, "generate request rejected");
            e
        })?;

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::Payload(format!("invalid completion: {e}")))?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_named_models_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    { "name": "qwen2.5-coder:32b", "size": 1 },
                    { "size": 2 },
                    { "name": "llama3:8b" }
                ]
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/api", server.uri()));
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["qwen2.5-coder:32b", "llama3:8b"]);
    }

    #[tokio::test]
    async fn listing_without_models_key_is_payload_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "oops": [] })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/api/", server.uri()));
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, InferenceError::Payload(_)));
    }

    #[tokio::test]
    async fn slow_listing_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "models": [] }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/api", server.uri()))
            .with_probe_timeout(Duration::from_millis(50));
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, InferenceError::Timeout));
    }

    #[tokio::test]
    async fn generate_sends_non_streamed_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "m",
                "prompt": "write hello",
                "stream": false
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "print('hi')" })),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/api", server.uri()));
        let text = client.generate("m", "write hello").await.unwrap();
        assert_eq!(text, "print('hi')");
    }

    #[tokio::test]
    async fn generate_error_status_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/api", server.uri()));
        let err = client.generate("missing", "x").await.unwrap_err();
        assert!(matches!(err, InferenceError::Status(404)));
        assert_eq!(err.to_string(), "HTTP status: 404");
    }

    #[tokio::test]
    async fn generate_non_json_is_payload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/api", server.uri()));
        let err = client.generate("m", "x").await.unwrap_err();
        assert!(matches!(err, InferenceError::Payload(_)));
    }
}
