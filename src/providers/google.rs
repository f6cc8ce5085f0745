//! Google generative language (Gemini) backend

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::request::PromptPlan;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest
{   pub contents: Vec<Content>
  , pub system_instruction: Content
  , pub generation_config: GenerationConfig
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content
{   #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>
  , #[serde(default)]
    pub parts: Vec<Part>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part
{   #[serde(default)]
    pub text: Option<String>
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig
{   pub temperature: f32
  , pub max_output_tokens: u32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse
{   #[serde(default)]
    pub candidates: Vec<Candidate>
  , #[serde(default)]
    pub prompt_feedback: Option<serde_json::Value>
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate
{   pub content: Option<Content>
  , #[serde(default)]
    pub finish_reason: Option<String>
}

fn text_content(role: Option<&str>, text: &str) -> Content
{   Content
    {   role: role.map(str::to_string)
      , parts: vec![Part { text: Some(text.to_string()) }]
    }
}

pub struct GoogleClient
{   http: reqwest::Client
}

impl GoogleClient
{   pub fn new() -> Self
    {   debug!("Creating GoogleClient");
        GoogleClient
        {   http: super::http_client()
        }
    }
}

impl Default for GoogleClient
{   fn default() -> Self
    {   GoogleClient::new()
    }
}

#[async_trait]
impl super::ProviderClient for GoogleClient
{   fn kind(&self) -> ProviderKind
    {   ProviderKind::Google
    }

    fn build_request(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<super::WireRequest, ProviderError>
    {   let api_key = super::require_key(config)?;
        let body = GenerateContentRequest
        {   contents: vec![
              text_content(Some("user"), &plan.user_prompt)
            ]
          , system_instruction: text_content(
              None,
              &plan.system_instruction
            )
          , generation_config: GenerationConfig
            {   temperature: config.temperature
              , max_output_tokens: config.max_tokens
              , seed: config.seed
            }
        };
        // Key travels in the URL; log only WireRequest::redacted_url
        Ok(super::WireRequest
        {   url: format!(
              "{}/models/{}:generateContent?key={}",
              config.base_url(),
              config.model,
              api_key
            )
          , headers: vec![]
          , body: serde_json::to_value(&body)?
        })
    }

    fn parse_response(&self, body: &str)
      -> Result<String, ProviderError>
    {   let response: GenerateContentResponse = super::decode(body)?;
        let candidate = match response.candidates.into_iter().next()
        {   Some(candidate) => candidate
          , None => {
              let reason = response.prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no candidates".to_string());
              return Err(ProviderError::MalformedResponse(reason));
            }
        };
        candidate.content
          .and_then(|content| content.parts.into_iter().next())
          .and_then(|part| part.text)
          .ok_or_else(|| ProviderError::MalformedResponse(format!(
            "candidate has no text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
          )))
    }

    fn map_status(&self, status: u16, body: &str) -> ProviderError
    {   // An invalid key comes back as 400 INVALID_ARGUMENT
        if status == 400
          && (body.contains("API_KEY_INVALID")
              || body.contains("API key not valid"))
        {   return ProviderError::Auth(format!(
              "HTTP 400: {}", super::error_message(body)
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
