//! Error types for svg-llm operations

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single provider call, already mapped out of the
/// backend's own status codes and envelopes.
/// Implements Clone for sending through channels
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError
{   /// Key missing or rejected, local model not installed, or a
    /// request that cannot be built from the configuration
    #[error("authentication failed: {0}")]
    Auth(String)
  , /// 429-equivalent or capacity signal
    #[error("rate limited: {0}")]
    RateLimit(String)
  , /// Connection failure or timeout
    #[error("network error: {0}")]
    Network(String)
  , /// Empty body or unexpected schema
    #[error("malformed response: {0}")]
    MalformedResponse(String)
}

impl ProviderError
{   /// Whether the dispatcher may try again
    pub fn is_retryable(&self) -> bool
    {   !matches!(self, ProviderError::Auth(_))
    }

    /// Whether this kind is bounded by the smaller malformed cap
    pub fn is_malformed(&self) -> bool
    {   matches!(self, ProviderError::MalformedResponse(_))
    }

    /// Pipeline stage named in user-visible messages
    pub fn stage(&self) -> &'static str
    {   match self
        {   ProviderError::Auth(_) => "authentication"
          , ProviderError::RateLimit(_) => "rate limiting"
          , ProviderError::Network(_) => "network"
          , ProviderError::MalformedResponse(_) => "response parsing"
        }
    }
}

/// Only transport failures are network errors. A request reqwest
/// cannot even build (bad URL, bad header) will fail the same way on
/// every attempt, so it is reported as non-retryable.
impl From<reqwest::Error> for ProviderError
{   fn from(e: reqwest::Error) -> Self
    {   if e.is_builder()
        {   ProviderError::Auth(format!(
              "request rejected before sending: {}",
              e.without_url()
            ))
        } else if e.is_decode()
        {   ProviderError::MalformedResponse(e.without_url().to_string())
        } else
        {   ProviderError::Network(e.without_url().to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError
{   fn from(e: serde_json::Error) -> Self
    {   ProviderError::MalformedResponse(e.to_string())
    }
}

/// Crate-level error surfaced to the host
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error
{   /// Provider or generator configuration rejected before dispatch
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String)
  , /// Generation request violates its invariants
    #[error("invalid request: {0}")]
    InvalidRequest(String)
  , /// Dispatch ended without text
    #[error(
      "{} stage failed after {attempts} attempt(s): {source}",
      .source.stage()
    )]
    Dispatch
    {   attempts: u32
      , source: ProviderError
    }
  , /// No usable SVG root in the model output
    #[error("extraction stage failed: {0}")]
    Extraction(String)
  , /// Caller cancelled the generation
    #[error("generation cancelled")]
    Cancelled
  , /// Backend task is gone
    #[error("backend disconnected")]
    BackendDisconnected
  , /// Reading configuration from disk failed
    #[error("io error: {0}")]
    Io(String)
}

impl Error
{   /// Whether the caller has to fix credentials
    pub fn is_auth(&self) -> bool
    {   matches!(
          self,
          Error::Dispatch { source: ProviderError::Auth(_), .. }
        )
    }
}

impl From<std::io::Error> for Error
{   fn from(e: std::io::Error) -> Self
    {   Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error
{   fn from(e: serde_json::Error) -> Self
    {   Error::InvalidConfiguration(e.to_string())
    }
}
