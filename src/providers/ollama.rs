//! Local Ollama daemon backend

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::request::PromptPlan;

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest
{   pub model: String
  , pub prompt: String
  , pub system: String
  , pub stream: bool
  , pub options: GenerateOptions
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions
{   pub temperature: f32
  , pub num_predict: u32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse
{   pub response: Option<String>
  , #[serde(default)]
    pub done: bool
}

pub struct OllamaClient
{   http: reqwest::Client
}

impl OllamaClient
{   pub fn new() -> Self
    {   debug!("Creating OllamaClient");
        OllamaClient
        {   http: super::http_client()
        }
    }
}

impl Default for OllamaClient
{   fn default() -> Self
    {   OllamaClient::new()
    }
}

#[async_trait]
impl super::ProviderClient for OllamaClient
{   fn kind(&self) -> ProviderKind
    {   ProviderKind::Ollama
    }

    fn build_request(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    ) -> Result<super::WireRequest, ProviderError>
    {   let body = GenerateRequest
        {   model: config.model.clone()
          , prompt: plan.user_prompt.clone()
          , system: plan.system_instruction.clone()
          , stream: false
          , options: GenerateOptions
            {   temperature: config.temperature
              , num_predict: config.max_tokens
              , seed: config.seed
            }
        };
        Ok(super::WireRequest
        {   url: format!("{}/api/generate", config.base_url())
          , headers: vec![]
          , body: serde_json::to_value(&body)?
        })
    }

    fn parse_response(&self, body: &str)
      -> Result<String, ProviderError>
    {   let response: GenerateResponse = super::decode(body)?;
        if !response.done
        {   debug!("Ollama reply not marked done");
        }
        response.response
          .ok_or_else(|| ProviderError::MalformedResponse(
            "missing response field".to_string()
          ))
    }

    fn map_status(&self, status: u16, body: &str) -> ProviderError
    {   // A model that was never pulled is a setup problem, not transient
        if status == 404
        {   return ProviderError::Auth(format!(
              "model not installed: {}", super::error_message(body)
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
