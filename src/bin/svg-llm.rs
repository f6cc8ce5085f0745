//! Command line front end: one request, fragments on stdout

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error, info, warn};

use svg_llm::{
  ColorScheme, Complexity, GenerationRequest, GeneratorConfig, Intent,
  ProviderConfig, ProviderKind, SizePreset, StrokeStyle, StyleHint,
  SvgBackend, SvgFragment,
};

#[derive(Debug, Parser)]
#[command(name = "svg-llm", version, about = "Generate SVG from a description")]
struct Cli
{   /// What to draw
    subject: String
  , /// openai, anthropic, google or ollama
    #[arg(short, long, env = "SVG_LLM_PROVIDER", default_value = "openai")]
    provider: ProviderKind
  , /// JSON generator config; replaces the environment defaults
    #[arg(long)]
    config: Option<PathBuf>
  , #[arg(short, long)]
    model: Option<String>
  , /// Base URL override
    #[arg(long)]
    endpoint: Option<String>
  , /// small, medium or large
    #[arg(long, default_value = "medium")]
    size: String
  , /// Custom width; needs --height
    #[arg(long, requires = "height")]
    width: Option<u32>
  , #[arg(long, requires = "width")]
    height: Option<u32>
  , #[arg(long, default_value = "generic")]
    intent: Intent
  , #[arg(long, default_value = "any")]
    style: StyleHint
  , #[arg(long, default_value = "any")]
    colors: ColorScheme
  , #[arg(long, default_value = "medium")]
    complexity: Complexity
  , #[arg(long, default_value = "any")]
    stroke: StrokeStyle
  , /// 1 to 4
    #[arg(short = 'n', long, default_value_t = 1)]
    variations: u8
  , /// Existing markup the result should fit with
    #[arg(long)]
    context: Option<PathBuf>
  , /// Insert a <title> when the model omits one
    #[arg(long)]
    accessible: bool
  , #[arg(long)]
    no_gradients: bool
  , #[arg(long)]
    no_animations: bool
  , #[arg(long)]
    seed: Option<u64>
  , /// Write variation-N.svg files here instead of printing
    #[arg(short, long)]
    out_dir: Option<PathBuf>
}

fn size_preset(cli: &Cli) -> Result<SizePreset, svg_llm::Error>
{   if let (Some(width), Some(height)) = (cli.width, cli.height)
    {   return Ok(SizePreset::Custom { width, height });
    }
    match cli.size.trim().to_ascii_lowercase().as_str()
    {   "small" => Ok(SizePreset::Small)
      , "medium" => Ok(SizePreset::Medium)
      , "large" => Ok(SizePreset::Large)
      , other => Err(svg_llm::Error::InvalidRequest(
          format!("unknown size preset: {}", other)
        ))
    }
}

fn load_config(cli: &Cli) -> Result<GeneratorConfig, svg_llm::Error>
{   let mut config = match &cli.config
    {   Some(path) => GeneratorConfig::load(path)?
      , None => GeneratorConfig::new(ProviderConfig::from_env(cli.provider))
    };
    if let Some(model) = &cli.model
    {   config.provider.model = model.clone();
    }
    if let Some(endpoint) = &cli.endpoint
    {   config.provider.endpoint = Some(endpoint.clone());
    }
    if cli.seed.is_some()
    {   config.provider.seed = cli.seed;
    }
    config.provider.validate()?;
    debug!("Using {:?}", config.provider);
    Ok(config)
}

fn build_request(cli: &Cli) -> Result<GenerationRequest, svg_llm::Error>
{   let context = match &cli.context
    {   Some(path) => Some(std::fs::read_to_string(path)?)
      , None => None
    };
    let preset = size_preset(cli)?;
    let mut request = GenerationRequest::from_preset(&cli.subject, preset)?
      .with_intent(cli.intent)
      .with_style(cli.style)
      .with_colors(cli.colors)
      .with_complexity(cli.complexity)
      .with_stroke(cli.stroke)
      .with_variations(cli.variations)?
      .with_accessibility(cli.accessible)
      .with_gradients(!cli.no_gradients)
      .with_animations(!cli.no_animations);
    if let Some(context) = context
    {   request = request.with_selection_context(context);
    }
    Ok(request)
}

fn emit(fragments: &[SvgFragment], out_dir: Option<&PathBuf>)
  -> Result<(), svg_llm::Error>
{   for (i, fragment) in fragments.iter().enumerate()
    {   for action in &fragment.repairs
        {   info!("variation {}: {}", i + 1, action);
        }
        match out_dir
        {   Some(dir) => {
              std::fs::create_dir_all(dir)?;
              let path = dir.join(format!("variation-{}.svg", i + 1));
              std::fs::write(&path, &fragment.markup)?;
              println!("{}", path.display());
            }
          , None => {
              if i > 0
              {   println!();
              }
              println!("{}", fragment.markup);
            }
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), svg_llm::Error>
{   let config = load_config(&cli)?;
    let request = build_request(&cli)?;
    let backend = SvgBackend::new(config);

    let mut reply_rx = backend.generate(request).await?;
    let outcome = tokio::select!
    { reply = reply_rx.recv() => {
        reply.unwrap_or(Err(svg_llm::Error::BackendDisconnected))
      }
    , _ = tokio::signal::ctrl_c() => {
        warn!("Interrupted; cancelling generation");
        backend.cancel().await?;
        reply_rx.recv().await
          .unwrap_or(Err(svg_llm::Error::Cancelled))
      }
    };
    backend.shutdown().await?;

    let fragments = outcome?;
    emit(&fragments, cli.out_dir.as_ref())
}

#[tokio::main]
async fn main() -> ExitCode
{   env_logger::init();
    let cli = Cli::parse();

    match run(cli).await
    {   Ok(()) => ExitCode::SUCCESS
      , Err(e) => {
          error!("{}", e);
          eprintln!("svg-llm: {}", e);
          ExitCode::FAILURE
        }
    }
}
