//! LLM provider implementations
//!
//! Every backend turns a [`PromptPlan`] into its own wire request and
//! digs the generated text back out of its own envelope. Upstream code
//! only ever sees [`ProviderError`] kinds, never backend identity.

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, trace};
use serde::Deserialize;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::request::PromptPlan;

// Re-export for convenience
pub use anthropic::AnthropicClient;
pub use google::GoogleClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

/// A fully described HTTP POST, before it touches the network
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest
{   pub url: String
  , pub headers: Vec<(String, String)>
  , pub body: serde_json::Value
}

impl WireRequest
{   /// URL safe to log: the query may carry a key
    pub fn redacted_url(&self) -> &str
    {   self.url.split('?').next().unwrap_or(&self.url)
    }
}

/// Capability interface implemented once per backend
#[async_trait]
pub trait ProviderClient: Send + Sync
{   fn kind(&self) -> ProviderKind;

    /// Serialize the plan into this backend's request
    fn build_request(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<WireRequest, ProviderError>;

    /// Locate the generated text in a successful reply body
    fn parse_response(&self, body: &str)
      -> Result<String, ProviderError>;

    /// Map a non-success status into the common kinds
    fn map_status(&self, status: u16, body: &str) -> ProviderError
    {   map_common_status(status, body)
    }

    /// Send one request and return the raw generated text
    async fn send(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<String, ProviderError>;
}

/// Build the client for a configured provider
pub fn client_for(config: &ProviderConfig) -> Arc<dyn ProviderClient>
{   debug!("Selecting {} client", config.provider);
    match config.provider
    {   ProviderKind::OpenAI => Arc::new(OpenAIClient::new())
      , ProviderKind::Anthropic => Arc::new(AnthropicClient::new())
      , ProviderKind::Google => Arc::new(GoogleClient::new())
      , ProviderKind::Ollama => Arc::new(OllamaClient::new())
    }
}

/// Shared send path: build, post, map status, parse
pub(crate) async fn execute<C>(
  client: &C
, http: &reqwest::Client
, plan: &PromptPlan
, config: &ProviderConfig
) -> Result<String, ProviderError>
where
  C: ProviderClient + ?Sized
{   let request = client.build_request(plan, config)?;
    debug!(
      "POST {} ({} / {})",
      request.redacted_url(), config.provider, config.model
    );
    trace!("Request body: {}", request.body);

    let mut builder = http
      .post(&request.url)
      .timeout(config.timeout())
      .json(&request.body);
    for (name, value) in &request.headers
    {   builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(|e| {
      let e = e.without_url();
      error!("HTTP error from {}: {}", config.provider, e);
      ProviderError::from(e)
    })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
      let e = e.without_url();
      error!("Failed reading body from {}: {}", config.provider, e);
      ProviderError::from(e)
    })?;
    trace!("{} response status: {}", config.provider, status);

    if !status.is_success()
    {   let mapped = client.map_status(status.as_u16(), &body);
        error!("{} API error: {}", config.provider, mapped);
        return Err(mapped);
    }

    let text = client.parse_response(&body)?;
    if text.trim().is_empty()
    {   return Err(ProviderError::MalformedResponse(
          "provider returned empty text".to_string()
        ));
    }
    Ok(text)
}

/// Key a hosted provider must have before anything is sent.
/// Template placeholders such as `sk-...` count as missing.
pub(crate) fn require_key(config: &ProviderConfig)
  -> Result<&str, ProviderError>
{   let key = config.api_key.as_deref()
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .ok_or_else(|| {
        error!("No API key for {}", config.provider);
        ProviderError::Auth(
          format!("missing API key for {}", config.provider)
        )
      })?;
    if key.ends_with("...")
    {   error!("Placeholder API key for {}", config.provider);
        return Err(ProviderError::Auth(
          format!("placeholder API key for {}", config.provider)
        ));
    }
    Ok(key)
}

pub(crate) fn http_client() -> reqwest::Client
{   reqwest::Client::builder()
      .user_agent(concat!("svg-llm/", env!("CARGO_PKG_VERSION")))
      .build()
      .unwrap_or_else(|e| {
        error!("Falling back to default HTTP client: {}", e);
        reqwest::Client::new()
      })
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope
{   error: Option<ErrorDetail>
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail
{   Object
    {   message: Option<String>
    }
  , Text(String)
}

/// Pull `error.message` (or `error` as a string) out of a reply
pub(crate) fn error_message(body: &str) -> String
{   let parsed = serde_json::from_str::<ErrorEnvelope>(body)
      .ok()
      .and_then(|env| env.error)
      .and_then(|detail| match detail
        {   ErrorDetail::Object { message } => message
          , ErrorDetail::Text(text) => Some(text)
        });
    match parsed
    {   Some(message) => message
      , None if body.trim().is_empty() => "empty body".to_string()
      , None => body.chars().take(200).collect()
    }
}

/// Status mapping shared by all HTTP backends
pub(crate) fn map_common_status(status: u16, body: &str)
  -> ProviderError
{   let message = format!("HTTP {}: {}", status, error_message(body));
    match status
    {   401 | 403 => ProviderError::Auth(message)
      , 429 => ProviderError::RateLimit(message)
      , 408 | 500..=599 => ProviderError::Network(message)
      , _ => ProviderError::MalformedResponse(message)
    }
}

/// Decode a reply body, reporting schema mismatches as malformed
pub(crate) fn decode<T>(body: &str) -> Result<T, ProviderError>
where
  T: serde::de::DeserializeOwned
{   if body.trim().is_empty()
    {   return Err(ProviderError::MalformedResponse(
          "empty body".to_string()
        ));
    }
    serde_json::from_str(body).map_err(|e| {
      error!("Parse error: {}", e);
      ProviderError::MalformedResponse(e.to_string())
    })
}
