//! Build prompt, dispatch with retry, extract: once per variation

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{
  GenerationSettings, GeneratorConfig, ProviderConfig, RetryPolicy,
};
use crate::error::{Error, Result};
use crate::prompt::PromptBuilder;
use crate::providers::{self, ProviderClient};
use crate::request::{GenerationRequest, PromptPlan};
use crate::retry::RetryingDispatcher;
use crate::svg::{RepairAction, SanitizeOptions, SvgFragment, SvgSanitizer};

/// Composes the pipeline stages. Cheap to clone; clones share the
/// provider client and its in-flight ceiling, so separate jobs on
/// one backend never exceed `max_concurrent` requests together.
#[derive(Clone)]
pub struct GenerationOrchestrator
{   client: Arc<dyn ProviderClient>
  , dispatcher: RetryingDispatcher
  , builder: PromptBuilder
  , settings: GenerationSettings
  , in_flight: Arc<Semaphore>
}

impl GenerationOrchestrator
{   pub fn new(
      client: Arc<dyn ProviderClient>
    , dispatcher: RetryingDispatcher
    , builder: PromptBuilder
    , settings: GenerationSettings
    ) -> Self
    {   let in_flight = Arc::new(
          Semaphore::new(settings.max_concurrent.max(1))
        );
        GenerationOrchestrator
        {   client
          , dispatcher
          , builder
          , settings
          , in_flight
        }
    }

    /// Real client for the configured provider, default policies
    pub fn for_provider(config: &ProviderConfig) -> Self
    {   GenerationOrchestrator::new(
          providers::client_for(config),
          RetryingDispatcher::new(RetryPolicy::default()),
          PromptBuilder::default(),
          GenerationSettings::default()
        )
    }

    pub fn from_config(config: &GeneratorConfig) -> Self
    {   let builder = PromptBuilder::new(config.templates.clone())
          .with_max_context_chars(config.generation.max_context_chars);
        GenerationOrchestrator::new(
          providers::client_for(&config.provider),
          RetryingDispatcher::new(config.retry.clone()),
          builder,
          config.generation.clone()
        )
    }

    pub fn settings(&self) -> &GenerationSettings
    {   &self.settings
    }

    /// Exactly `variation_count` fragments, or the first fatal error.
    /// Earlier successes are dropped when a later variation fails.
    pub async fn generate(
      &self
    , request: &GenerationRequest
    , config: &ProviderConfig
    , cancel: &CancellationToken
    ) -> Result<Vec<SvgFragment>>
    {   request.validate()?;
        config.validate()?;
        if config.provider != self.client.kind()
        {   warn!(
              "Config names {} but client is {}",
              config.provider, self.client.kind()
            );
        }
        info!("Generating {}", request.summary());

        let plan = self.builder.build(request);
        let sanitizer = SvgSanitizer::new(self.sanitize_options(request));
        let total = request.variation_count();

        let fragments = if self.settings.max_concurrent <= 1 || total == 1
        {   self.generate_sequential(&plan, config, &sanitizer, total, cancel)
              .await?
        } else
        {   self.generate_concurrent(&plan, config, &sanitizer, total, cancel)
              .await?
        };
        info!("Generated {} fragment(s)", fragments.len());
        Ok(fragments)
    }

    fn sanitize_options(&self, request: &GenerationRequest) -> SanitizeOptions
    {   SanitizeOptions
        {   target: Some((request.width(), request.height()))
          , title: request.accessible()
              .then(|| request.subject().trim().to_string())
          , allow_gradients: request.allow_gradients()
          , allow_animations: request.allow_animations()
          , fallback_color: self.settings.fallback_color.clone()
        }
    }

    async fn generate_sequential(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    , sanitizer: &SvgSanitizer
    , total: u8
    , cancel: &CancellationToken
    ) -> Result<Vec<SvgFragment>>
    {   let mut fragments = Vec::with_capacity(total as usize);
        for index in 0..total
        {   let fragment = self
              .generate_variation(
                plan, config, sanitizer, index, total, cancel
              )
              .await?;
            fragments.push(fragment);
        }
        Ok(fragments)
    }

    async fn generate_concurrent(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    , sanitizer: &SvgSanitizer
    , total: u8
    , cancel: &CancellationToken
    ) -> Result<Vec<SvgFragment>>
    {   debug!(
          "Dispatching {} variations, at most {} in flight",
          total, self.settings.max_concurrent
        );
        // Child token: a failing variation stops its siblings without
        // cancelling the caller's token
        let batch = cancel.child_token();
        let mut tasks = JoinSet::new();

        for index in 0..total
        {   let this = self.clone();
            let plan = plan.clone();
            let config = config.clone();
            let sanitizer = sanitizer.clone();
            let batch = batch.clone();
            tasks.spawn(async move {
              this.generate_variation(
                  &plan, &config, &sanitizer, index, total, &batch
                )
                .await
                .map(|fragment| (index, fragment))
            });
        }

        let mut slots: Vec<Option<SvgFragment>> = vec![None; total as usize];
        while let Some(joined) = tasks.join_next().await
        {   let outcome = joined.unwrap_or_else(|e| {
              error!("Variation task failed to complete: {}", e);
              Err(Error::Cancelled)
            });
            match outcome
            {   Ok((index, fragment)) => {
                  slots[index as usize] = Some(fragment);
                }
              , Err(e) => {
                  batch.cancel();
                  tasks.abort_all();
                  return Err(e);
                }
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// One usable fragment for the variation at `index`
    async fn generate_variation(
      &self
    , plan: &PromptPlan
    , config: &ProviderConfig
    , sanitizer: &SvgSanitizer
    , index: u8
    , total: u8
    , cancel: &CancellationToken
    ) -> Result<SvgFragment>
    {   let plan = plan.for_variation(index, total);
        let mut config = config.clone();
        config.seed = config.seed.map(|s| s.wrapping_add(index as u64));

        let attempts = self.settings.extraction_attempts.max(1);
        let mut last_problem = String::new();
        for attempt in 1..=attempts
        {   debug!(
              "Variation {}/{} dispatch {}/{}",
              index + 1, total, attempt, attempts
            );
            let permit = tokio::select!
            { biased;
              _ = cancel.cancelled() => return Err(Error::Cancelled)
            , permit = self.in_flight.acquire() => {
                permit.map_err(|_| Error::Cancelled)?
              }
            };
            let text = self.dispatcher
              .dispatch(self.client.as_ref(), &plan, &config, cancel)
              .await
              .into_result();
            drop(permit);
            let text = text?;

            match sanitizer.extract(&text)
            {   Ok(candidates) => match self.pick(candidates)
                {   Some(fragment) => return Ok(fragment)
                  , None => {
                      last_problem = "no valid svg in model output".to_string();
                    }
                }
              , Err(e) => {
                  last_problem = e.to_string();
                }
            }
            warn!(
              "Variation {} attempt {} unusable: {}",
              index + 1, attempt, last_problem
            );
        }
        error!("Variation {} produced no usable svg", index + 1);
        Err(Error::Extraction(format!(
          "variation {}: {} after {} attempt(s)",
          index + 1, last_problem, attempts
        )))
    }

    /// First valid candidate (or first at all when invalid ones are
    /// accepted); the rest are noted and dropped
    fn pick(&self, candidates: Vec<SvgFragment>) -> Option<SvgFragment>
    {   let extra = candidates.len().saturating_sub(1);
        let position = candidates.iter()
          .position(|f| f.valid)
          .or_else(|| {
            (self.settings.accept_invalid && !candidates.is_empty())
              .then_some(0)
          })?;
        let mut fragment = candidates.into_iter().nth(position)?;
        if extra > 0
        {   warn!("Model returned {} extra svg root(s); keeping one", extra);
            fragment.repairs.push(RepairAction::DiscardedCandidates(extra));
        }
        for action in &fragment.repairs
        {   warn!("Repaired model output: {}", action);
        }
        if !fragment.valid
        {   warn!("Accepting invalid fragment: {:?}", fragment.error);
        }
        Some(fragment)
    }
}
