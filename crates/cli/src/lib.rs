use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use intent_pipeline::{local_path, PipelineConfig};
use intent_protocol::LoadProgress;
use intent_vector_store::{EmbeddingIndex, EmbeddingMode, EmbeddingModel, ModelSpec, ProgressFn};
use serde::Serialize;
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::app::Session;
use crate::flags::EmbedMode;
use crate::output::{resolve_all, ResolvedCommand, StatusOutput};

mod app;
mod flags;
mod output;
mod repl;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

pub(crate) fn print_json_line<T: Serialize>(value: &T) -> Result<()> {
    print_stdout(&serde_json::to_string(value)?)
}

fn print_json_pretty<T: Serialize>(value: &T) -> Result<()> {
    print_stdout(&serde_json::to_string_pretty(value)?)
}

pub(crate) fn status_output(session: &Session) -> StatusOutput {
    StatusOutput {
        snapshot: session.pipeline.snapshot(),
        stuck: session.pipeline.is_stuck(),
        registry_commands: session.registry.len(),
    }
}

#[derive(Parser)]
#[command(name = "intent")]
#[command(about = "Offline natural-language command matching", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Model directory (overrides INTENT_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Embedding index file (overrides INTENT_EMBEDDINGS)
    #[arg(long, global = true)]
    embeddings: Option<PathBuf>,

    /// Command registry file (overrides INTENT_REGISTRY; default: bundled registry)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Session name; model loads are serialized per session (overrides INTENT_SESSION)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Directory holding session lock files (overrides INTENT_LOCK_DIR)
    #[arg(long, global = true)]
    lock_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one query and print the outcome as JSON
    Ask(AskArgs),

    /// Read queries from stdin and print one JSON outcome per line
    Repl(ReplArgs),

    /// Lexical lookup only; never loads the model
    Fallback(FallbackArgs),

    /// Embed every registry command and write the embedding index
    #[command(name = "embed-registry")]
    EmbedRegistry(EmbedRegistryArgs),

    /// Boot the pipeline and report its state
    Status(StatusArgs),
}

#[derive(Args)]
struct AskArgs {
    /// Query text
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    /// Editor context used to boost matching commands (e.g. "post")
    #[arg(long)]
    context: Option<String>,

    /// JSON array of {label, url} menu entries to learn before querying
    #[arg(long)]
    menu: Option<PathBuf>,

    /// Answer immediately instead of waiting for the pipeline to boot
    #[arg(long)]
    no_wait: bool,

    /// Maximum time to wait for the pipeline
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Args)]
struct ReplArgs {
    /// Editor context used to boost matching commands
    #[arg(long)]
    context: Option<String>,

    /// JSON array of {label, url} menu entries to learn at startup
    #[arg(long)]
    menu: Option<PathBuf>,

    /// Maximum time `:wait` and `:live` block for
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Args)]
struct FallbackArgs {
    /// Query text
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
}

#[derive(Args)]
struct EmbedRegistryArgs {
    /// Output path for the embedding index
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct StatusArgs {
    /// Maximum time to wait for the pipeline to settle
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    if let Some(mode) = cli.embed_mode {
        env::set_var("INTENT_EMBEDDING_MODE", mode.as_str());
    }
    if let Some(dir) = &cli.model_dir {
        env::set_var("INTENT_MODEL_DIR", dir);
    }
    if let Some(path) = &cli.embeddings {
        env::set_var("INTENT_EMBEDDINGS", path);
    }
    if let Some(path) = &cli.registry {
        env::set_var("INTENT_REGISTRY", path);
    }
    if let Some(session) = &cli.session {
        env::set_var("INTENT_SESSION", session);
    }
    if let Some(dir) = &cli.lock_dir {
        env::set_var("INTENT_LOCK_DIR", dir);
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ort stays silent unless --verbose.
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Ask(args) => run_ask(args).await,
        Commands::Repl(args) => run_repl(args).await,
        Commands::Fallback(args) => run_fallback(&args),
        Commands::EmbedRegistry(args) => run_embed_registry(args).await,
        Commands::Status(args) => run_status(args).await,
    }
}

async fn run_ask(args: AskArgs) -> Result<()> {
    let session = Session::start(args.menu.as_deref()).await?;
    if !args.no_wait {
        session.settle(Duration::from_secs(args.timeout_secs)).await;
    }
    let query = args.query.join(" ");
    let output = session.resolve(&query, args.context).await;
    print_json_pretty(&output)
}

async fn run_repl(args: ReplArgs) -> Result<()> {
    let session = Session::start(args.menu.as_deref()).await?;
    repl::run(&session, args.context, Duration::from_secs(args.timeout_secs)).await
}

#[derive(Serialize)]
struct FallbackOutput {
    query: String,
    commands: Vec<ResolvedCommand>,
}

fn run_fallback(args: &FallbackArgs) -> Result<()> {
    let registry = app::load_registry()?;
    let query = args.query.join(" ");
    let matcher = intent_search::FallbackMatcher::new(registry.clone());
    let matches = matcher.search(&query);
    let output = FallbackOutput {
        commands: resolve_all(&matches, &registry, &Default::default()),
        query,
    };
    print_json_pretty(&output)
}

#[derive(Serialize)]
struct EmbedRegistryOutput {
    out: PathBuf,
    mode: &'static str,
    commands: usize,
    dimension: Option<usize>,
}

async fn run_embed_registry(args: EmbedRegistryArgs) -> Result<()> {
    let registry = app::load_registry()?;
    let mode = EmbeddingMode::from_env().context("Invalid embedding mode")?;
    let model_dir = local_path(&PipelineConfig::from_env().model_location)?;

    let progress: &ProgressFn = &|progress: LoadProgress| {
        log::debug!("Reading model weights: {}", progress.label());
    };
    let model = EmbeddingModel::from_mode(mode, &model_dir, ModelSpec::default(), Some(progress))
        .await
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;
    let index = EmbeddingIndex::build(&registry, &model)
        .await
        .context("Failed to embed command registry")?;

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    index
        .save(&args.out)
        .await
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    log::info!(
        "Wrote {} embeddings to {}",
        index.len(),
        args.out.display()
    );

    print_json_pretty(&EmbedRegistryOutput {
        out: args.out,
        mode: mode.as_str(),
        commands: index.len(),
        dimension: index.dimension(),
    })
}

async fn run_status(args: StatusArgs) -> Result<()> {
    let session = Session::start(None).await?;
    session.settle(Duration::from_secs(args.timeout_secs)).await;
    print_json_pretty(&status_output(&session))
}
