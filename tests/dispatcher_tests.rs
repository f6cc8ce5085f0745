mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{openai_config, MockClient, RecordingClock};
use svg_llm::{
  DispatchResult, Error, PromptPlan, ProviderError, RetryPolicy,
  RetryingDispatcher,
};

fn plan() -> PromptPlan
{   PromptPlan
    {   user_prompt: "Generate SVG code for: a lighthouse".to_string()
      , system_instruction: "Only SVG.".to_string()
    }
}

fn dispatcher(clock: Arc<RecordingClock>) -> RetryingDispatcher
{   RetryingDispatcher::with_clock(RetryPolicy::new(100, 10_000, 1), clock)
}

fn network() -> ProviderError
{   ProviderError::Network("connection reset".to_string())
}

#[tokio::test]
async fn test_succeeds_after_transient_failures()
{   let client = MockClient::scripted(vec![
      Err(ProviderError::RateLimit("slow down".to_string()))
    , Err(network())
    , Ok("<svg/>".to_string())
    ]);
    let clock = Arc::new(RecordingClock::default());
    let config = openai_config().with_max_retries(3);

    let result = dispatcher(clock.clone())
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;

    assert_eq!(
      result,
      DispatchResult::Success { text: "<svg/>".to_string(), attempts: 3 }
    );
    assert_eq!(client.calls(), 3);
    assert_eq!(
      clock.sleeps(),
      vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn test_gives_up_after_max_retries()
{   let client = MockClient::scripted(vec![Err(network())]);
    let clock = Arc::new(RecordingClock::default());
    let config = openai_config().with_max_retries(2);

    let result = dispatcher(clock.clone())
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;

    assert_eq!(
      result,
      DispatchResult::TerminalFailure { error: network(), attempts: 3 }
    );
    assert_eq!(client.calls(), 3);
    assert_eq!(clock.sleeps().len(), 2);
}

#[tokio::test]
async fn test_zero_retries_means_one_attempt()
{   let client = MockClient::scripted(vec![Err(network())]);
    let clock = Arc::new(RecordingClock::default());
    let config = openai_config().with_max_retries(0);

    let result = dispatcher(clock.clone())
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;

    assert_eq!(result.attempts(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_auth_failure_is_terminal_immediately()
{   let auth = ProviderError::Auth("bad key".to_string());
    let client = MockClient::scripted(vec![Err(auth.clone())]);
    let clock = Arc::new(RecordingClock::default());
    let config = openai_config().with_max_retries(5);

    let result = dispatcher(clock.clone())
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;

    assert_eq!(
      result,
      DispatchResult::TerminalFailure { error: auth, attempts: 1 }
    );
    assert_eq!(client.calls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_malformed_responses_use_the_smaller_cap()
{   let malformed = ProviderError::MalformedResponse("no choices".to_string());
    let client = MockClient::scripted(vec![Err(malformed.clone())]);
    let clock = Arc::new(RecordingClock::default());
    let config = openai_config().with_max_retries(5);

    let result = dispatcher(clock)
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;

    assert_eq!(
      result,
      DispatchResult::TerminalFailure { error: malformed, attempts: 2 }
    );
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_cancelled_before_first_attempt()
{   let client = MockClient::always("<svg/>");
    let clock = Arc::new(RecordingClock::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = dispatcher(clock)
      .dispatch(&client, &plan(), &openai_config(), &cancel)
      .await;

    assert_eq!(result, DispatchResult::Cancelled { attempts: 0 });
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_during_backoff()
{   let client = MockClient::scripted(vec![Err(network())]);
    let cancel = CancellationToken::new();
    let clock = Arc::new(RecordingClock::cancelling(cancel.clone()));
    let config = openai_config().with_max_retries(3);

    let result = dispatcher(clock.clone())
      .dispatch(&client, &plan(), &config, &cancel)
      .await;

    assert_eq!(result, DispatchResult::Cancelled { attempts: 1 });
    assert_eq!(client.calls(), 1);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(100)]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_times_out_as_network_failure()
{   let client = MockClient::always("<svg/>")
      .with_delay(Duration::from_secs(120));
    let clock = Arc::new(RecordingClock::default());
    let mut config = openai_config().with_max_retries(1);
    config.timeout_secs = 1;

    let result = dispatcher(clock.clone())
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;

    match result
    {   DispatchResult::TerminalFailure
        {   error: ProviderError::Network(message)
          , attempts
        } => {
          assert_eq!(attempts, 2);
          assert!(message.contains("timed out"));
        }
      , other => panic!("unexpected result: {:?}", other)
    }
    assert_eq!(client.calls(), 2);
    assert_eq!(clock.sleeps().len(), 1);
}

#[tokio::test]
async fn test_terminal_failure_names_stage_and_attempts()
{   let client = MockClient::scripted(vec![Err(network())]);
    let clock = Arc::new(RecordingClock::default());
    let config = openai_config().with_max_retries(2);

    let result = dispatcher(clock)
      .dispatch(&client, &plan(), &config, &CancellationToken::new())
      .await;
    let error = tokio_test::assert_err!(result.into_result());

    assert_eq!(
      error,
      Error::Dispatch { attempts: 3, source: network() }
    );
    assert_eq!(
      error.to_string(),
      "network stage failed after 3 attempt(s): \
       network error: connection reset"
    );
}

#[test]
fn test_backoff_grows_and_is_capped()
{   let policy = RetryPolicy::default();
    assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
    assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(2));
    assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(4));
    assert_eq!(policy.backoff_for_attempt(6), Duration::from_secs(30));
    assert_eq!(policy.backoff_for_attempt(40), Duration::from_secs(30));
}
