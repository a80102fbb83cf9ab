//! PrivateMode (OpenAI-compatible) HTTP client implementation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sigbridge_core::config::PrivateModeConfig;
use sigbridge_core::session::ChatMessage;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::base::{build_messages, CompletionGateway, GatewayError, GatewayResult};

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

/// Chat completion response body
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `/v1/models` response body
#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Client for the PrivateMode proxy or any OpenAI-compatible endpoint
pub struct PrivateModeClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: Option<String>,
    temperature: f32,
    max_tokens: u32,
    extra_headers: HashMap<String, String>,
}

impl PrivateModeClient {
    /// Create a new client.
    ///
    /// `api_base` is the proxy root (e.g. `http://localhost:8080`); the `/v1`
    /// paths are appended per request. With no `model`, the first model the
    /// backend lists is used for every completion.
    pub fn new(api_base: impl Into<String>, model: Option<String>, timeout: Duration) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let model = model.filter(|m| !m.trim().is_empty());

        Self {
            client: Client::builder()
                .http1_only() // Force HTTP/1.1 to avoid issues with some local servers
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base,
            api_key: None,
            model,
            temperature: 0.7,
            max_tokens: 1000,
            extra_headers: HashMap::new(),
        }
    }

    /// Build a client from the `privatemode` configuration section
    pub fn from_config(config: &PrivateModeConfig) -> Self {
        let mut client = Self::new(
            config.api_base.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        );
        client.api_key = Some(config.api_key.clone()).filter(|k| !k.is_empty());
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        client.extra_headers = config.extra_headers.clone();
        client
    }

    /// Set the bearer token sent with every request
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Configured model, if any
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    fn apply_headers(&self, mut req_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        for (key, value) in &self.extra_headers {
            req_builder = req_builder.header(key, value);
        }

        req_builder
    }

    /// Pick the model for a completion: configured one, else the first listed
    async fn resolve_model(&self) -> GatewayResult<String> {
        if let Some(model) = &self.model {
            return Ok(model.clone());
        }

        let models = self.list_models().await?;
        match models.into_iter().next() {
            Some(model) => {
                info!("Using model: {}", model);
                Ok(model)
            }
            None => Err(GatewayError::NoModelsConfigured),
        }
    }

    /// Turn a non-success status into a `BadResponse` carrying the body
    async fn check_status(response: reqwest::Response) -> GatewayResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!("API error: {} - {}", status, error_text);
        Err(GatewayError::BadResponse(format!(
            "HTTP {}: {}",
            status, error_text
        )))
    }

    fn parse_response(response: ChatCompletionResponse) -> GatewayResult<String> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::BadResponse("No choices in response".to_string()))?;

        match choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(GatewayError::BadResponse(
                "Empty completion content".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CompletionGateway for PrivateModeClient {
    async fn complete(&self, history: &[ChatMessage], new_turn: &str) -> GatewayResult<String> {
        let model = self.resolve_model().await?;
        let request = ChatCompletionRequest {
            model: &model,
            messages: build_messages(history, new_turn),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            "Sending chat request to {} with model {} ({} messages)",
            self.api_base,
            model,
            request.messages.len()
        );

        let url = self.endpoint("chat/completions");
        let response = self
            .apply_headers(self.client.post(&url).json(&request))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let response_data: ChatCompletionResponse = response.json().await?;
        Self::parse_response(response_data)
    }

    async fn list_models(&self) -> GatewayResult<Vec<String>> {
        let url = self.endpoint("models");
        debug!("Listing models at {}", url);

        let response = self.apply_headers(self.client.get(&url)).send().await?;
        let response = Self::check_status(response).await?;

        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
