//! OpenAI chat completions backend

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::request::PromptPlan;

// ===== Message Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , #[serde(default)]
    pub content: Option<String>
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub temperature: f32
  , pub max_tokens: u32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse
{   pub choices: Vec<Choice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ChatMessage
  , pub finish_reason: Option<String>
}

// ===== Client =====

pub struct OpenAIClient
{   http: reqwest::Client
}

impl OpenAIClient
{   pub fn new() -> Self
    {   debug!("Creating OpenAIClient");
        OpenAIClient
        {   http: super::http_client()
        }
    }
}

impl Default for OpenAIClient
{   fn default() -> Self
    {   OpenAIClient::new()
    }
}

#[async_trait]
impl super::ProviderClient for OpenAIClient
{   fn kind(&self) -> ProviderKind
    {   ProviderKind::OpenAI
    }

    fn build_request(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<super::WireRequest, ProviderError>
    {   let api_key = super::require_key(config)?;
        let body = ChatRequest
        {   model: config.model.clone()
          , messages: vec![
              ChatMessage
              {   role: "system".to_string()
                , content: Some(plan.system_instruction.clone())
              }
            , ChatMessage
              {   role: "user".to_string()
                , content: Some(plan.user_prompt.clone())
              }
            ]
          , temperature: config.temperature
          , max_tokens: config.max_tokens
          , seed: config.seed
        };
        Ok(super::WireRequest
        {   url: format!("{}/chat/completions", config.base_url())
          , headers: vec![(
              "Authorization".to_string()
            , format!("Bearer {}", api_key)
            )]
          , body: serde_json::to_value(&body)?
        })
    }

    fn parse_response(&self, body: &str)
      -> Result<String, ProviderError>
    {   let response: ChatResponse = super::decode(body)?;
        let choice = response.choices.into_iter()
          .next()
          .ok_or_else(|| ProviderError::MalformedResponse(
            "no choices in response".to_string()
          ))?;
        if choice.finish_reason.as_deref() == Some("length")
        {   debug!("OpenAI reply truncated at max_tokens");
        }
        choice.message.content
          .ok_or_else(|| ProviderError::MalformedResponse(
            "choice has no content".to_string()
          ))
    }

    fn map_status(&self, status: u16, body: &str) -> ProviderError
    {   // OpenAI reports exhausted billing as 429 as well
        if status == 429 && body.contains("insufficient_quota")
        {   return ProviderError::Auth(format!(
              "HTTP 429: {}", super::error_message(body)
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
