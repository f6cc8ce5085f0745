use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use log::{debug, error, info};

use crate::config::{GeneratorConfig, ProviderConfig};
use crate::orchestrator::GenerationOrchestrator;
use crate::SvgFoot;

/// Backend state owned by the event loop
pub struct SvgBackendState
{   pub config: GeneratorConfig
  , pub orchestrator: GenerationOrchestrator
  , /// Parent of every in-flight generation's token
    pub cancel: CancellationToken
}

impl SvgBackendState
{   pub fn new(
      config: GeneratorConfig
    , orchestrator: GenerationOrchestrator
    ) -> Self
    {   debug!(
          "Initializing SvgBackendState for {}",
          config.provider.provider
        );
        SvgBackendState
        {   config
          , orchestrator
          , cancel: CancellationToken::new()
        }
    }
}

/// Public API for the generator backend - owns the task
pub struct SvgBackend
{   hand: crate::SvgHand
  , _task_handle: tokio::task::JoinHandle<()>
}

impl SvgBackend
{   /// Create and spawn a backend for the given configuration.
    /// Returns immediately - spawns background task
    pub fn new(config: GeneratorConfig) -> Self
    {   let orchestrator = GenerationOrchestrator::from_config(&config);
        SvgBackend::spawn(SvgBackendState::new(config, orchestrator))
    }

    /// Spawn around an existing orchestrator (custom clients, tests).
    /// A later `set_provider` replaces it with the provider's own client.
    pub fn with_orchestrator(
      provider: ProviderConfig
    , orchestrator: GenerationOrchestrator
    ) -> Self
    {   let mut config = GeneratorConfig::new(provider);
        config.generation = orchestrator.settings().clone();
        SvgBackend::spawn(SvgBackendState::new(config, orchestrator))
    }

    fn spawn(state: SvgBackendState) -> Self
    {   debug!("Creating SvgBackend with task ownership");

        let (generate_tx, generate_rx)
          = mpsc::unbounded_channel();
        let (set_provider_tx, set_provider_rx)
          = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx)
          = mpsc::unbounded_channel();
        let (kill_process_tx, kill_process_rx)
          = mpsc::unbounded_channel();

        let hand = crate::SvgHand
        {   generate_tx
          , set_provider_tx
          , cancel_tx
          , kill_process_tx
        };

        let foot = crate::SvgFoot
        {   generate_rx
          , set_provider_rx
          , cancel_rx
          , kill_process_rx
        };

        let _task_handle = tokio::spawn(async move {
          run_backend_loop(foot, state).await
        });

        SvgBackend
        {   hand
          , _task_handle
        }
    }

    /// Queue a generation - returns almost immediately
    pub async fn generate(
      &self
    , request: crate::GenerationRequest
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GenerateReply>,
        crate::error::Error
      >
    {   debug!("generate queuing: {}", request.summary());
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::GenerateArgs
        {   request
          , reply: reply_tx
        };

        self.hand.generate_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::BackendDisconnected
          })?;

        Ok(reply_rx)
    }

    /// Swap provider settings - returns almost immediately
    pub async fn set_provider(
      &self
    , config: ProviderConfig
    ) -> Result<
        mpsc::UnboundedReceiver<crate::SetProviderReply>,
        crate::error::Error
      >
    {   debug!("set_provider queuing {}", config.provider);
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::SetProviderArgs
        {   config
          , reply: reply_tx
        };

        self.hand.set_provider_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::BackendDisconnected
          })?;

        Ok(reply_rx)
    }

    /// Cancel every generation in flight
    pub async fn cancel(&self)
      -> Result<(), crate::error::Error>
    {   debug!("cancel queuing");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        self.hand.cancel_tx
          .send(crate::CancelArgs { reply: reply_tx })
          .map_err(|_| {
            error!("Backend channel closed");
            crate::error::Error::BackendDisconnected
          })?;

        reply_rx.recv().await
          .unwrap_or(Err(crate::error::Error::BackendDisconnected))
    }

    /// Gracefully shutdown the backend
    pub async fn shutdown(self)
      -> Result<(), crate::error::Error>
    {   debug!("Shutting down SvgBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::KillProcessArgs
        {   reply: reply_tx
        };

        self.hand.kill_process_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel already closed");
            crate::error::Error::BackendDisconnected
          })?;

        // Wait for shutdown confirmation
        if let Some(result) = reply_rx.recv().await
        {   debug!("Backend shutdown confirmed");
            result
        } else
        {   error!("Backend exited without confirming shutdown");
            Err(crate::error::Error::BackendDisconnected)
        }
    }
}

/// Main backend event loop
///
/// tokio::select! is only for fast queueing: each generation runs
/// in its own task so cancel and shutdown stay responsive.
async fn run_backend_loop(
  foot: crate::SvgFoot
, mut state: SvgBackendState
)
{   debug!("Starting SvgBackend event loop");
    let SvgFoot
    {   mut generate_rx
      , mut set_provider_rx
      , mut cancel_rx
      , mut kill_process_rx
    } = foot;

    loop
    { tokio::select!
      { Some(cmd) = generate_rx.recv() => {
          debug!("Received Generate");
          let orchestrator = state.orchestrator.clone();
          let provider = state.config.provider.clone();
          let token = state.cancel.child_token();
          tokio::spawn(async move {
            let result = orchestrator
              .generate(&cmd.request, &provider, &token)
              .await;
            if let Err(e) = &result
            {   error!("Generation failed: {}", e);
            }
            let _ = cmd.reply.send(result);
          });
        }
      , Some(cmd) = set_provider_rx.recv() => {
          debug!("Received SetProvider for {}", cmd.config.provider);
          let result = cmd.config.validate().map(|_| {
            state.config.provider = cmd.config;
            state.orchestrator
              = GenerationOrchestrator::from_config(&state.config);
          });
          let _ = cmd.reply.send(result);
        }
      , Some(cmd) = cancel_rx.recv() => {
          info!("Cancelling in-flight generations");
          state.cancel.cancel();
          state.cancel = CancellationToken::new();
          let _ = cmd.reply.send(Ok(()));
        }
      , Some(cmd) = kill_process_rx.recv() => {
          debug!("Received KillProcess");
          state.cancel.cancel();
          let _ = cmd.reply.send(Ok(()));
          info!("SvgBackend shutting down");
          break;
        }
      , else => {
          debug!("All command channels closed");
          break;
        }
      }
    }
}
