mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{openai_config, MockClient, RecordingClock, SQUARE_SVG};
use svg_llm::{
  Error, GenerationOrchestrator, GenerationRequest, GenerationSettings,
  PromptBuilder, PromptPlan, ProviderError, RepairAction, RetryPolicy,
  RetryingDispatcher,
};

fn orchestrator(
  client: Arc<MockClient>
, settings: GenerationSettings
) -> GenerationOrchestrator
{   GenerationOrchestrator::new(
      client,
      RetryingDispatcher::with_clock(
        RetryPolicy::new(10, 100, 1),
        Arc::new(RecordingClock::default())
      ),
      PromptBuilder::default(),
      settings
    )
}

fn request(variations: u8) -> GenerationRequest
{   GenerationRequest::new("a paper boat", 100, 100)
      .unwrap()
      .with_variations(variations)
      .unwrap()
}

/// Labels each reply with the variation that asked for it
fn labelled(plan: &PromptPlan) -> String
{   let label = (2..=4)
      .find(|n| plan.user_prompt.contains(&format!("Variation {} of", n)))
      .unwrap_or(1);
    format!(
      "<svg width=\"100\" height=\"100\"><text>v{}</text></svg>",
      label
    )
}

#[tokio::test]
async fn test_single_variation_is_sanitized()
{   let client = Arc::new(MockClient::always(
      &format!("Sure! Here you go:\n{}", SQUARE_SVG)
    ));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request(1), &openai_config(), &CancellationToken::new())
        .await
    );

    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].valid);
    assert_eq!(fragments[0].width, Some(100.0));
    assert!(fragments[0].markup.contains("viewBox=\"0 0 100 100\""));
    assert!(fragments[0].repairs
      .contains(&RepairAction::StrippedSurroundingText));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_variations_come_back_in_order()
{   let client = Arc::new(MockClient::new(|plan, _| Ok(labelled(plan))));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request(3), &openai_config(), &CancellationToken::new())
        .await
    );

    assert_eq!(fragments.len(), 3);
    for (i, fragment) in fragments.iter().enumerate()
    {   assert!(fragment.markup.contains(&format!("<text>v{}</text>", i + 1)));
    }
    let plans = client.plans();
    assert!(!plans[0].user_prompt.contains("Variation"));
    assert!(plans[2].user_prompt.contains("Variation 3 of 3"));
}

#[tokio::test]
async fn test_failed_variation_fails_the_whole_request()
{   let client = Arc::new(MockClient::new(|plan, _| {
      if plan.user_prompt.contains("Variation 2 of 3")
      {   Err(ProviderError::Auth("key revoked".to_string()))
      } else
      {   Ok(labelled(plan))
      }
    }));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());

    let error = tokio_test::assert_err!(
      orchestrator
        .generate(&request(3), &openai_config(), &CancellationToken::new())
        .await
    );

    assert!(error.is_auth());
    assert_eq!(
      error,
      Error::Dispatch
      {   attempts: 1
        , source: ProviderError::Auth("key revoked".to_string())
      }
    );
    // Variation 3 is never requested
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_first_valid_root_is_kept()
{   let reply = "<svg><rect x=\"1\" x=\"2\"/></svg>\n\
                 <svg width=\"100\" height=\"100\"><circle r=\"9\"/></svg>";
    let client = Arc::new(MockClient::always(reply));
    let orchestrator = orchestrator(client, GenerationSettings::default());

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request(1), &openai_config(), &CancellationToken::new())
        .await
    );

    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].valid);
    assert!(fragments[0].markup.contains("<circle r=\"9\"/>"));
    assert!(fragments[0].repairs
      .contains(&RepairAction::DiscardedCandidates(1)));
}

#[tokio::test]
async fn test_output_without_svg_is_dispatched_again()
{   let client = Arc::new(MockClient::scripted(vec![
      Ok("I would draw a boat with a triangular sail.".to_string())
    , Ok(SQUARE_SVG.to_string())
    ]));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request(1), &openai_config(), &CancellationToken::new())
        .await
    );

    assert_eq!(fragments.len(), 1);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_extraction_gives_up_after_the_limit()
{   let client = Arc::new(MockClient::always("No SVG today."));
    let settings = GenerationSettings
    {   extraction_attempts: 3
      , ..GenerationSettings::default()
    };
    let orchestrator = orchestrator(client.clone(), settings);

    let error = tokio_test::assert_err!(
      orchestrator
        .generate(&request(1), &openai_config(), &CancellationToken::new())
        .await
    );

    assert!(matches!(error, Error::Extraction(_)));
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn test_invalid_fragment_is_accepted_when_configured()
{   let client = Arc::new(MockClient::always("<svg><rect x=\"1\" x=\"2\"/></svg>"));
    let settings = GenerationSettings
    {   accept_invalid: true
      , ..GenerationSettings::default()
    };
    let orchestrator = orchestrator(client.clone(), settings);

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request(1), &openai_config(), &CancellationToken::new())
        .await
    );

    assert!(!fragments[0].valid);
    assert!(fragments[0].error.is_some());
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_variations_keep_their_order()
{   let client = Arc::new(MockClient::new(|plan, _| Ok(labelled(plan))));
    let settings = GenerationSettings
    {   max_concurrent: 3
      , ..GenerationSettings::default()
    };
    let orchestrator = orchestrator(client.clone(), settings);

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request(4), &openai_config(), &CancellationToken::new())
        .await
    );

    assert_eq!(fragments.len(), 4);
    for (i, fragment) in fragments.iter().enumerate()
    {   assert!(fragment.markup.contains(&format!("<text>v{}</text>", i + 1)));
    }
    assert_eq!(client.calls(), 4);
}

#[tokio::test]
async fn test_clones_share_the_in_flight_ceiling()
{   let client = Arc::new(
      MockClient::new(|plan, _| Ok(labelled(plan)))
        .with_delay(std::time::Duration::from_millis(10))
    );
    let settings = GenerationSettings
    {   max_concurrent: 2
      , ..GenerationSettings::default()
    };
    let first = orchestrator(client.clone(), settings);
    let second = first.clone();
    let config = openai_config();
    let cancel = CancellationToken::new();

    let request_a = request(3);
    let request_b = request(3);
    let (a, b) = tokio::join!(
      first.generate(&request_a, &config, &cancel),
      second.generate(&request_b, &config, &cancel)
    );

    assert_eq!(tokio_test::assert_ok!(a).len(), 3);
    assert_eq!(tokio_test::assert_ok!(b).len(), 3);
    assert_eq!(client.calls(), 6);
    assert_eq!(client.peak_in_flight(), 2);
}

#[tokio::test]
async fn test_concurrent_failure_returns_no_fragments()
{   let client = Arc::new(MockClient::new(|plan, _| {
      if plan.user_prompt.contains("Variation 2 of 3")
      {   Err(ProviderError::Auth("key revoked".to_string()))
      } else
      {   Ok(labelled(plan))
      }
    }));
    let settings = GenerationSettings
    {   max_concurrent: 2
      , ..GenerationSettings::default()
    };
    let orchestrator = orchestrator(client, settings);

    let result = orchestrator
      .generate(&request(3), &openai_config(), &CancellationToken::new())
      .await;

    assert!(tokio_test::assert_err!(result).is_auth());
}

#[tokio::test]
async fn test_cancelled_token_stops_generation()
{   let client = Arc::new(MockClient::always(SQUARE_SVG));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator
      .generate(&request(2), &openai_config(), &cancel)
      .await;

    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected_before_dispatch()
{   let client = Arc::new(MockClient::always(SQUARE_SVG));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());
    let mut config = openai_config();
    config.temperature = 3.5;

    let result = orchestrator
      .generate(&request(1), &config, &CancellationToken::new())
      .await;

    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_each_variation_gets_its_own_seed()
{   let client = Arc::new(MockClient::always(SQUARE_SVG));
    let orchestrator = orchestrator(client.clone(), GenerationSettings::default());
    let config = openai_config().with_seed(40);

    tokio_test::assert_ok!(
      orchestrator
        .generate(&request(3), &config, &CancellationToken::new())
        .await
    );

    assert_eq!(client.seeds(), vec![Some(40), Some(41), Some(42)]);
}

#[tokio::test]
async fn test_accessible_request_gets_a_title()
{   let client = Arc::new(MockClient::always(SQUARE_SVG));
    let orchestrator = orchestrator(client, GenerationSettings::default());
    let request = request(1).with_accessibility(true);

    let fragments = tokio_test::assert_ok!(
      orchestrator
        .generate(&request, &openai_config(), &CancellationToken::new())
        .await
    );

    assert!(fragments[0].markup.contains("<title>a paper boat</title>"));
}
