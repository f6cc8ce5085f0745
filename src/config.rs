//! Configuration for providers, retries and generation

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const OLLAMA_DEFAULT_ENDPOINT: &str
  = "http://localhost:11434";

/// Backends a generation can be dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind
{   /// OpenAI chat completions
    OpenAI
  , /// Anthropic messages
    Anthropic
  , /// Google generative language (Gemini)
    Google
  , /// Local Ollama daemon
    Ollama
}

impl ProviderKind
{   pub fn as_str(&self) -> &'static str
    {   match self
        {   ProviderKind::OpenAI => "openai"
          , ProviderKind::Anthropic => "anthropic"
          , ProviderKind::Google => "google"
          , ProviderKind::Ollama => "ollama"
        }
    }

    pub fn default_model(&self) -> &'static str
    {   match self
        {   ProviderKind::OpenAI => "gpt-4-turbo"
          , ProviderKind::Anthropic => "claude-3-5-sonnet-latest"
          , ProviderKind::Google => "gemini-1.5-flash"
          , ProviderKind::Ollama => "llama3"
        }
    }

    pub fn default_endpoint(&self) -> &'static str
    {   match self
        {   ProviderKind::OpenAI => "https://api.openai.com/v1"
          , ProviderKind::Anthropic => "https://api.anthropic.com/v1"
          , ProviderKind::Google
              => "https://generativelanguage.googleapis.com/v1beta"
          , ProviderKind::Ollama => OLLAMA_DEFAULT_ENDPOINT
        }
    }

    /// Only the local daemon runs without a key
    pub fn requires_api_key(&self) -> bool
    {   !matches!(self, ProviderKind::Ollama)
    }

    fn key_env_vars(&self) -> &'static [&'static str]
    {   match self
        {   ProviderKind::OpenAI => &["OPENAI_API_KEY"]
          , ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"]
          , ProviderKind::Google
              => &["GOOGLE_API_KEY", "GEMINI_API_KEY"]
          , ProviderKind::Ollama => &[]
        }
    }
}

impl fmt::Display for ProviderKind
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind
{   type Err = Error;

    fn from_str(s: &str) -> Result<Self>
    {   match s.trim().to_ascii_lowercase().as_str()
        {   "openai" => Ok(ProviderKind::OpenAI)
          , "anthropic" | "claude" => Ok(ProviderKind::Anthropic)
          , "google" | "gemini" => Ok(ProviderKind::Google)
          , "ollama" | "local" => Ok(ProviderKind::Ollama)
          , other => Err(Error::InvalidConfiguration(
              format!("unknown provider: {}", other)
            ))
        }
    }
}

/// Everything a backend needs to serve one request
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig
{   pub provider: ProviderKind
  , pub model: String
  , /// Secret; absent only for the local daemon
    #[serde(default)]
    pub api_key: Option<String>
  , /// Base URL override (the local daemon's host, a proxy, tests)
    #[serde(default)]
    pub endpoint: Option<String>
  , pub temperature: f32
  , pub max_tokens: u32
  , pub timeout_secs: u64
  , pub max_retries: u32
  , #[serde(default)]
    pub seed: Option<u64>
}

impl fmt::Debug for ProviderConfig
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.debug_struct("ProviderConfig")
          .field("provider", &self.provider)
          .field("model", &self.model)
          .field(
            "api_key",
            &self.api_key.as_ref().map(|_| "<redacted>")
          )
          .field("endpoint", &self.endpoint)
          .field("temperature", &self.temperature)
          .field("max_tokens", &self.max_tokens)
          .field("timeout_secs", &self.timeout_secs)
          .field("max_retries", &self.max_retries)
          .field("seed", &self.seed)
          .finish()
    }
}

impl ProviderConfig
{   /// Defaults for a provider, without a key
    pub fn new(provider: ProviderKind) -> Self
    {   ProviderConfig
        {   provider
          , model: provider.default_model().to_string()
          , api_key: None
          , endpoint: None
          , temperature: 0.7
          , max_tokens: 2000
          , timeout_secs: 60
          , max_retries: 3
          , seed: None
        }
    }

    /// Defaults plus the key (or daemon host) from the environment
    pub fn from_env(provider: ProviderKind) -> Self
    {   let mut config = ProviderConfig::new(provider);
        config.api_key = provider.key_env_vars()
          .iter()
          .find_map(|var| std::env::var(var).ok())
          .filter(|k| !k.trim().is_empty());
        if provider == ProviderKind::Ollama
        {   config.endpoint = std::env::var("OLLAMA_HOST")
              .ok()
              .filter(|h| !h.trim().is_empty());
        }
        debug!(
          "Loaded {} config from env (key present: {})",
          provider, config.api_key.is_some()
        );
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self
    {   self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self
    {   self.api_key = Some(key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self
    {   self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self
    {   self.max_retries = max_retries;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self
    {   self.seed = Some(seed);
        self
    }

    /// Base URL without a trailing slash. A bare `host:port`, as
    /// `OLLAMA_HOST` is usually written, is taken as plain http.
    pub fn base_url(&self) -> String
    {   let raw = self.endpoint.as_deref()
          .map(str::trim)
          .unwrap_or(self.provider.default_endpoint())
          .trim_end_matches('/');
        if raw.contains("://")
        {   raw.to_string()
        } else
        {   format!("http://{}", raw)
        }
    }

    pub fn timeout(&self) -> Duration
    {   Duration::from_secs(self.timeout_secs)
    }

    /// Check ranges; a missing key is reported later as an auth
    /// failure so the host sees it as a credentials problem.
    pub fn validate(&self) -> Result<()>
    {   if self.model.trim().is_empty()
        {   return Err(Error::InvalidConfiguration(
              "model name is empty".to_string()
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature)
        {   return Err(Error::InvalidConfiguration(format!(
              "temperature {} outside 0.0-2.0", self.temperature
            )));
        }
        if self.max_tokens == 0
        {   return Err(Error::InvalidConfiguration(
              "max_tokens must be positive".to_string()
            ));
        }
        if self.timeout_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "timeout_secs must be positive".to_string()
            ));
        }
        let url = self.base_url();
        match reqwest::Url::parse(&url)
        {   Ok(parsed)
              if matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some() => {}
          , Ok(_) => {
              return Err(Error::InvalidConfiguration(format!(
                "endpoint {} is not an http(s) URL", url
              )));
            }
          , Err(e) => {
              return Err(Error::InvalidConfiguration(format!(
                "endpoint {} is not a valid URL: {}", url, e
              )));
            }
        }
        Ok(())
    }
}

/// Backoff schedule for the retrying dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy
{   /// Delay after the first failed attempt, in milliseconds
    pub base_delay_ms: u64
  , pub backoff_multiplier: f64
  , /// Ceiling on any single wait, in milliseconds
    pub max_delay_ms: u64
  , /// Retries allowed for malformed responses
    pub malformed_max_retries: u32
}

impl RetryPolicy
{   pub fn new(
      base_delay_ms: u64
    , max_delay_ms: u64
    , malformed_max_retries: u32
    ) -> Self
    {   RetryPolicy
        {   base_delay_ms
          , backoff_multiplier: 2.0
          , max_delay_ms
          , malformed_max_retries
        }
    }

    /// Wait after the given failed attempt (1-based):
    /// `base * multiplier^(attempt-1)`, capped.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration
    {   let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay
          = self.base_delay_ms as f64
            * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(1000, 30_000, 1)
    }
}

/// Knobs for the generation orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings
{   /// Variations in flight at once; 1 dispatches sequentially
    pub max_concurrent: usize
  , /// Dispatches per variation while no usable fragment comes back
    pub extraction_attempts: u32
  , /// Hand back fragments that failed validation
    pub accept_invalid: bool
  , /// Solid paint replacing stripped gradient references
    pub fallback_color: String
  , /// Selection context is truncated to this many characters
    pub max_context_chars: usize
}

impl Default for GenerationSettings
{   fn default() -> Self
    {   GenerationSettings
        {   max_concurrent: 1
          , extraction_attempts: 2
          , accept_invalid: false
          , fallback_color: "#000000".to_string()
          , max_context_chars: 2000
        }
    }
}

/// Preset phrase tables; keys are the lowercase option names.
/// A key missing from a table omits that sentence from the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates
{   /// Used when no intent is given or the intent has no entry.
    /// `{subject}` is replaced.
    pub generic: String
  , pub intents: BTreeMap<String, String>
  , pub styles: BTreeMap<String, String>
  , pub colors: BTreeMap<String, String>
  , pub complexity: BTreeMap<String, String>
  , pub strokes: BTreeMap<String, String>
  , pub system_instruction: String
}

fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String>
{   entries.iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
}

impl Default for PromptTemplates
{   fn default() -> Self
    {   PromptTemplates
        {   generic: "Generate SVG code for: {subject}".to_string()
          , intents: table(&[
              ("icon", "Generate an SVG icon of: {subject}. \
                It must read clearly at small sizes.")
            , ("logo", "Generate an SVG logo for: {subject}. \
                Keep it balanced and memorable.")
            , ("diagram", "Generate an SVG diagram of: {subject}. \
                Label parts with <text> where useful.")
            , ("pattern", "Generate a seamless SVG pattern of: \
                {subject}.")
            , ("illustration", "Generate an SVG illustration of: \
                {subject}.")
            ])
          , styles: table(&[
              ("minimal", "Use a minimal, clean design with simple shapes")
            , ("detailed", "Include detailed elements and complexity")
            , ("flat", "Use flat design principles with solid colors")
            , ("outline", "Use only outlines/strokes, no fills")
            , ("filled", "Use filled shapes with no or minimal strokes")
            , ("geometric", "Use geometric shapes and patterns")
            , ("organic", "Use organic, natural flowing shapes")
            ])
          , colors: table(&[
              ("monochrome", "Use only one color in different shades")
            , ("warm", "Use warm colors (reds, oranges, yellows)")
            , ("cool", "Use cool colors (blues, greens, purples)")
            , ("pastel", "Use soft pastel colors")
            , ("vibrant", "Use bright, vibrant colors")
            , ("grayscale", "Use only black, white, and gray")
            ])
          , complexity: table(&[
              ("simple", "Keep it simple: fewer than 10 elements")
            , ("medium", "Use a moderate amount of detail")
            , ("complex", "Use rich detail with many elements")
            ])
          , strokes: table(&[
              ("thin", "Use thin strokes (1-2px)")
            , ("medium", "Use medium strokes (2-4px)")
            , ("thick", "Use bold, thick strokes (4px or more)")
            , ("none", "Do not use strokes")
            ])
          , system_instruction: "You are an expert SVG code generator. \
              You only respond with valid, clean SVG code without any \
              explanation or markdown formatting. Never include ```svg \
              or ``` markers.".to_string()
        }
    }
}

/// Complete generator configuration, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig
{   pub provider: ProviderConfig
  , #[serde(default)]
    pub retry: RetryPolicy
  , #[serde(default)]
    pub generation: GenerationSettings
  , #[serde(default)]
    pub templates: PromptTemplates
}

impl GeneratorConfig
{   pub fn new(provider: ProviderConfig) -> Self
    {   GeneratorConfig
        {   provider
          , retry: RetryPolicy::default()
          , generation: GenerationSettings::default()
          , templates: PromptTemplates::default()
        }
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {   let path = path.as_ref();
        debug!("Loading generator config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config: GeneratorConfig = serde_json::from_str(&text)?;
        config.provider.validate()?;
        Ok(config)
    }
}
