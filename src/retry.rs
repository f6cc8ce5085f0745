//! Retry, backoff and timeout enforcement around provider calls

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::{ProviderConfig, RetryPolicy};
use crate::error::{Error, ProviderError};
use crate::providers::ProviderClient;
use crate::request::PromptPlan;

/// Sleep source for backoff waits, swappable in tests
#[async_trait]
pub trait Clock: Send + Sync
{   async fn sleep(&self, duration: Duration);
}

/// Wall-clock sleeping through tokio's timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock
{   async fn sleep(&self, duration: Duration)
    {   tokio::time::sleep(duration).await;
    }
}

/// Outcome of a dispatch. `TransientFailure` only comes out of a
/// single [`RetryingDispatcher::attempt`]; a full dispatch ends in
/// one of the other three.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult
{   Success
    {   text: String
      , attempts: u32
    }
  , TransientFailure
    {   error: ProviderError
      , attempts: u32
    }
  , TerminalFailure
    {   error: ProviderError
      , attempts: u32
    }
  , Cancelled
    {   attempts: u32
    }
}

impl DispatchResult
{   pub fn attempts(&self) -> u32
    {   match self
        {   DispatchResult::Success { attempts, .. }
          | DispatchResult::TransientFailure { attempts, .. }
          | DispatchResult::TerminalFailure { attempts, .. }
          | DispatchResult::Cancelled { attempts } => *attempts
        }
    }

    /// Collapse into the crate error model
    pub fn into_result(self) -> Result<String, Error>
    {   match self
        {   DispatchResult::Success { text, .. } => Ok(text)
          , DispatchResult::TransientFailure { error, attempts }
          | DispatchResult::TerminalFailure { error, attempts }
              => Err(Error::Dispatch { attempts, source: error })
          , DispatchResult::Cancelled { .. } => Err(Error::Cancelled)
        }
    }
}

/// Per-call states
#[derive(Debug)]
enum DispatchState
{   Idle
  , Attempting
    {   attempt: u32
      , malformed: u32
    }
  , RetryWait
    {   attempt: u32
      , malformed: u32
      , error: ProviderError
    }
  , Done(DispatchResult)
}

/// Drives a provider call through bounded retries with exponential
/// backoff. Cancellation is observed before each attempt, during the
/// in-flight request and during the backoff wait.
#[derive(Clone)]
pub struct RetryingDispatcher
{   policy: RetryPolicy
  , clock: Arc<dyn Clock>
}

impl RetryingDispatcher
{   pub fn new(policy: RetryPolicy) -> Self
    {   RetryingDispatcher::with_clock(policy, Arc::new(TokioClock))
    }

    pub fn with_clock(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self
    {   RetryingDispatcher
        {   policy
          , clock
        }
    }

    /// One attempt under the per-attempt timeout, classified
    pub async fn attempt(
      &self
    , client: &dyn ProviderClient
    , plan: &PromptPlan
    , config: &ProviderConfig
    , attempt: u32
    , cancel: &CancellationToken
    ) -> DispatchResult
    {   let timeout = config.timeout();
        let outcome = tokio::select!
        { biased;
          _ = cancel.cancelled() => {
            return DispatchResult::Cancelled { attempts: attempt };
          }
        , result = tokio::time::timeout(
            timeout,
            client.send(plan, config)
          ) => result
        };

        match outcome
        {   Ok(Ok(text)) => DispatchResult::Success
            {   text
              , attempts: attempt
            }
          , Ok(Err(error)) if error.is_retryable()
              => DispatchResult::TransientFailure
            {   error
              , attempts: attempt
            }
          , Ok(Err(error)) => DispatchResult::TerminalFailure
            {   error
              , attempts: attempt
            }
          , Err(_) => DispatchResult::TransientFailure
            {   error: ProviderError::Network(format!(
                  "attempt timed out after {}s", timeout.as_secs()
                ))
              , attempts: attempt
            }
        }
    }

    /// Run the full attempt sequence for one prompt plan
    pub async fn dispatch(
      &self
    , client: &dyn ProviderClient
    , plan: &PromptPlan
    , config: &ProviderConfig
    , cancel: &CancellationToken
    ) -> DispatchResult
    {   let mut state = DispatchState::Idle;
        loop
        {   state = match state
            {   DispatchState::Idle => {
                  debug!(
                    "Dispatching to {} (max retries {})",
                    config.provider, config.max_retries
                  );
                  DispatchState::Attempting
                  {   attempt: 1
                    , malformed: 0
                  }
                }
              , DispatchState::Attempting { attempt, malformed } => {
                  if cancel.is_cancelled()
                  {   DispatchState::Done(DispatchResult::Cancelled
                      {   attempts: attempt - 1
                      })
                  } else
                  {   debug!("Attempt {} to {}", attempt, config.provider);
                      match self
                        .attempt(client, plan, config, attempt, cancel)
                        .await
                      {   DispatchResult::TransientFailure { error, .. }
                            => self.after_retryable(
                                 attempt, malformed, error, config
                               )
                        , DispatchResult::TerminalFailure { error, .. }
                            => {
                              error!(
                                "Terminal {} error: {}",
                                config.provider, error
                              );
                              DispatchState::Done(
                                DispatchResult::TerminalFailure
                                {   error
                                  , attempts: attempt
                                }
                              )
                            }
                        , done => DispatchState::Done(done)
                      }
                  }
                }
              , DispatchState::RetryWait { attempt, malformed, error } => {
                  let delay = self.policy.backoff_for_attempt(attempt);
                  warn!(
                    "Attempt {} failed ({}); retrying in {:?}",
                    attempt, error, delay
                  );
                  let cancelled = tokio::select!
                  { biased;
                    _ = cancel.cancelled() => true
                  , _ = self.clock.sleep(delay) => false
                  };
                  if cancelled || cancel.is_cancelled()
                  {   info!("Dispatch cancelled during backoff");
                      DispatchState::Done(DispatchResult::Cancelled
                      {   attempts: attempt
                      })
                  } else
                  {   DispatchState::Attempting
                      {   attempt: attempt + 1
                        , malformed
                      }
                  }
                }
              , DispatchState::Done(result) => {
                  if let DispatchResult::Cancelled { attempts } = &result
                  {   info!(
                        "Dispatch cancelled after {} attempt(s)",
                        attempts
                      );
                  }
                  return result;
              }
            };
        }
    }

    /// Decide between waiting and giving up after a retryable error
    fn after_retryable(
      &self
    , attempt: u32
    , malformed: u32
    , error: ProviderError
    , config: &ProviderConfig
    ) -> DispatchState
    {   let malformed = if error.is_malformed()
        {   malformed + 1
        } else
        {   malformed
        };
        let retries_used = attempt - 1;
        let exhausted = retries_used >= config.max_retries
          || (error.is_malformed()
              && malformed > self.policy.malformed_max_retries);
        if exhausted
        {   error!(
              "Giving up on {} after {} attempt(s): {}",
              config.provider, attempt, error
            );
            DispatchState::Done(DispatchResult::TerminalFailure
            {   error
              , attempts: attempt
            })
        } else
        {   DispatchState::RetryWait
            {   attempt
              , malformed
              , error
            }
        }
    }
}
