pub mod error;
pub mod config;
pub mod request;
pub mod prompt;
pub mod providers;
pub mod retry;
pub mod svg;
pub mod orchestrator;
pub mod client;

/*

svg-llm: async library that turns a short description into SVG
markup through one of several LLM backends (OpenAI, Anthropic,
Google, Ollama). Model output is untrusted text; everything that
leaves the crate has been extracted, repaired and normalized.

svg-llm/
├── Cargo.toml
├── src/
│   ├── lib.rs           # Re-exports and the backend channel API
│   ├── error.rs         # ProviderError / Error
│   ├── config.rs        # Provider, retry, generation and template config
│   ├── request.rs       # GenerationRequest and PromptPlan
│   ├── prompt.rs        # PromptBuilder
│   ├── providers/       # One client per backend wire format
│   ├── retry.rs         # RetryingDispatcher and Clock
│   ├── svg/             # Extraction, repair and normalization
│   ├── orchestrator.rs  # Variation loop
│   ├── client.rs        # SvgBackend task
│   └── bin/svg-llm.rs   # Command line front end
└── tests/

*/

pub use crate::client::SvgBackend;
pub use crate::config::{
  GenerationSettings, GeneratorConfig, PromptTemplates, ProviderConfig,
  ProviderKind, RetryPolicy,
};
pub use crate::error::{Error, ProviderError, Result};
pub use crate::orchestrator::GenerationOrchestrator;
pub use crate::prompt::PromptBuilder;
pub use crate::providers::{client_for, ProviderClient, WireRequest};
pub use crate::request::{
  ColorScheme, Complexity, GenerationRequest, Intent, PromptPlan,
  SizePreset, StrokeStyle, StyleHint,
};
pub use crate::retry::{Clock, DispatchResult, RetryingDispatcher, TokioClock};
pub use crate::svg::{
  RepairAction, SanitizeOptions, SvgFragment, SvgSanitizer, ViewBox,
};

/// SVG-LLM BACKEND INTERFACE:

// ===== Generate =====

pub type GenerateReply
  = Result<Vec<crate::svg::SvgFragment>>;
pub type GenerateReplySender
  = tokio::sync::mpsc::UnboundedSender<GenerateReply>;

pub struct GenerateArgs
{   pub request: crate::request::GenerationRequest
  , pub reply: GenerateReplySender
}

// ===== SetProvider =====

pub type SetProviderReply = Result<()>;
pub type SetProviderReplySender
  = tokio::sync::mpsc::UnboundedSender<SetProviderReply>;

pub struct SetProviderArgs
{   pub config: crate::config::ProviderConfig
  , pub reply: SetProviderReplySender
}

// ===== Cancel =====

pub type CancelReply = Result<()>;
pub type CancelReplySender
  = tokio::sync::mpsc::UnboundedSender<CancelReply>;

pub struct CancelArgs
{   pub reply: CancelReplySender
}

// ===== KillProcess =====

pub type KillProcessReply = Result<()>;
pub type KillProcessReplySender
  = tokio::sync::mpsc::UnboundedSender<KillProcessReply>;

pub struct KillProcessArgs
{   pub reply: KillProcessReplySender
}

// ===== SvgHand (sender side) =====

pub struct SvgHand
{   pub generate_tx
      : tokio::sync::mpsc::UnboundedSender<GenerateArgs>
  , pub set_provider_tx
      : tokio::sync::mpsc::UnboundedSender<SetProviderArgs>
  , pub cancel_tx
      : tokio::sync::mpsc::UnboundedSender<CancelArgs>
  , pub kill_process_tx
      : tokio::sync::mpsc::UnboundedSender<KillProcessArgs>
}

// ===== SvgFoot (receiver side) =====

pub struct SvgFoot
{   pub generate_rx
      : tokio::sync::mpsc::UnboundedReceiver<GenerateArgs>
  , pub set_provider_rx
      : tokio::sync::mpsc::UnboundedReceiver<SetProviderArgs>
  , pub cancel_rx
      : tokio::sync::mpsc::UnboundedReceiver<CancelArgs>
  , pub kill_process_rx
      : tokio::sync::mpsc::UnboundedReceiver<KillProcessArgs>
}
