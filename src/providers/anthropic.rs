//! Anthropic messages backend

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::request::PromptPlan;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest
{   pub model: String
  , pub max_tokens: u32
  , pub system: String
  , pub messages: Vec<Message>
  , pub temperature: f32
}

#[derive(Debug, Clone, Serialize)]
pub struct Message
{   pub role: String
  , pub content: String
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse
{   pub content: Vec<ContentBlock>
  , #[serde(default)]
    pub stop_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock
{   #[serde(rename = "type")]
    pub block_type: String
  , #[serde(default)]
    pub text: Option<String>
}

pub struct AnthropicClient
{   http: reqwest::Client
}

impl AnthropicClient
{   pub fn new() -> Self
    {   debug!("Creating AnthropicClient");
        AnthropicClient
        {   http: super::http_client()
        }
    }
}

impl Default for AnthropicClient
{   fn default() -> Self
    {   AnthropicClient::new()
    }
}

#[async_trait]
impl super::ProviderClient for AnthropicClient
{   fn kind(&self) -> ProviderKind
    {   ProviderKind::Anthropic
    }

    fn build_request(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<super::WireRequest, ProviderError>
    {   let api_key = super::require_key(config)?;
        // The messages API has no seed parameter
        let body = MessagesRequest
        {   model: config.model.clone()
          , max_tokens: config.max_tokens
          , system: plan.system_instruction.clone()
          , messages: vec![
              Message
              {   role: "user".to_string()
                , content: plan.user_prompt.clone()
              }
            ]
          , temperature: config.temperature.min(1.0)
        };
        Ok(super::WireRequest
        {   url: format!("{}/messages", config.base_url())
          , headers: vec![
              ("x-api-key".to_string(), api_key.to_string())
            , (
                "anthropic-version".to_string()
              , ANTHROPIC_VERSION.to_string()
              )
            ]
          , body: serde_json::to_value(&body)?
        })
    }

    fn parse_response(&self, body: &str)
      -> Result<String, ProviderError>
    {   let response: MessagesResponse = super::decode(body)?;
        if response.stop_reason.as_deref() == Some("max_tokens")
        {   debug!("Anthropic reply truncated at max_tokens");
        }
        response.content.into_iter()
          .find(|block| block.block_type == "text")
          .and_then(|block| block.text)
          .ok_or_else(|| ProviderError::MalformedResponse(
            "no text block in content".to_string()
          ))
    }

    fn map_status(&self, status: u16, body: &str) -> ProviderError
    {   // 529 overloaded_error is a capacity signal
        if status == 529
        {   return ProviderError::RateLimit(format!(
              "HTTP 529: {}", super::error_message(body)
            ));
        }
        super::map_common_status(status, body)
    }

    async fn send(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<String, ProviderError>
    {   super::execute(self, &self.http, plan, config).await
    }
}
