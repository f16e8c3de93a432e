//! Calliope command line
//!
//! Ranks reference pools into exemplar packs and checks candidate text for
//! copying, with the embedder chosen by configuration or `--embedder`.

use calliope_core::{
    config::{EmbedderProvider, EngineConfig},
    embeddings::{self, EmbeddingIndex},
    error::{CalliopeError, Result},
    policy::ArmId,
    retrieval::{CopyGuard, HybridRanker},
    types::{FragmentRole, GeneratedCandidate, ReferenceItem, RetrievalContext, WeightVector},
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calliope")]
#[command(about = "Hybrid exemplar retrieval with anti-copy guarding", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "CALLIOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Embedder override: hashing, remote or local
    #[arg(long, global = true)]
    embedder: Option<String>,

    /// Set log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank a reference pool into an exemplar pack (JSON on stdout)
    Rank {
        /// JSON array of reference items
        #[arg(long)]
        pool: PathBuf,

        #[arg(long)]
        persona: String,

        #[arg(long)]
        content_type: String,

        /// Query text; defaults to "<persona> <content type>"
        #[arg(long)]
        seed_text: Option<String>,

        /// Pack size; defaults to the configured size
        #[arg(short, long)]
        k: Option<usize>,

        /// Rank with a named arm's weights instead of the global defaults
        #[arg(long)]
        arm: Option<String>,
    },

    /// Check candidate text against a pool for copying
    CheckCopy {
        /// JSON array of reference items
        #[arg(long)]
        pool: PathBuf,

        /// Candidate text
        #[arg(long)]
        candidate: String,

        /// Candidate hook, checked on its own
        #[arg(long)]
        hook: Option<String>,

        /// Candidate caption, checked on its own
        #[arg(long)]
        caption: Option<String>,

        /// Candidate call to action, checked on its own
        #[arg(long)]
        cta: Option<String>,

        #[arg(long, default_value = "default")]
        persona: String,

        #[arg(long, default_value = "default")]
        content_type: String,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Validate a configuration file
    Validate {
        /// File to validate; defaults to --config
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>, embedder: Option<&str>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::default(),
    };
    if let Some(name) = embedder {
        config.embedder.provider = name.parse::<EmbedderProvider>()?;
    }
    Ok(config)
}

fn load_pool(path: &Path) -> Result<Vec<ReferenceItem>> {
    let content = std::fs::read_to_string(path)?;
    let mut pool: Vec<ReferenceItem> = serde_json::from_str(&content)?;
    pool.iter_mut().for_each(ReferenceItem::adopt_fragments);
    info!("Loaded {} reference items from {}", pool.len(), path.display());
    Ok(pool)
}

async fn rank(
    config: &EngineConfig,
    pool_path: &Path,
    context: RetrievalContext,
    k: Option<usize>,
    arm: Option<&str>,
) -> Result<()> {
    let pool = load_pool(pool_path)?;
    let weights = match arm {
        Some(name) => name.parse::<ArmId>()?.arm().weights,
        None => WeightVector::GLOBAL_DEFAULT,
    };

    let embedder = embeddings::from_config(&config.embedder).await?;
    let index = EmbeddingIndex::new();
    index.refresh_items(&pool, embedder.as_ref()).await?;
    let query = embedder.embed(&context.query_text()).await?;

    let ranker = HybridRanker::new(config);
    let pack = ranker.rank(
        &context,
        &pool,
        &weights,
        Some(&query),
        &index,
        k.unwrap_or_else(|| ranker.default_pack_size()),
        Utc::now(),
    );

    println!("{}", serde_json::to_string_pretty(&pack)?);
    Ok(())
}

async fn check_copy(
    config: &EngineConfig,
    pool_path: &Path,
    candidate: &GeneratedCandidate,
    context: RetrievalContext,
) -> Result<()> {
    let pool = load_pool(pool_path)?;
    let context = context.with_seed_text(candidate.text.clone());

    let embedder = embeddings::from_config(&config.embedder).await?;
    let index = EmbeddingIndex::new();
    index.refresh_items(&pool, embedder.as_ref()).await?;
    let query = embedder.embed(&candidate.text).await?;

    let pack = HybridRanker::new(config).rank(
        &context,
        &pool,
        &WeightVector::GLOBAL_DEFAULT,
        Some(&query),
        &index,
        pool.len(),
        Utc::now(),
    );

    let check = CopyGuard::new(config.copy_guard.clone())
        .check_candidate(candidate, &pack, embedder.as_ref())
        .await?;
    println!("{}", serde_json::to_string_pretty(&check)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "calliope={level},calliope_core={level},reqwest=warn,hyper=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Calliope v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Rank {
            pool,
            persona,
            content_type,
            seed_text,
            k,
            arm,
        } => {
            let config = load_config(cli.config.as_deref(), cli.embedder.as_deref())?;
            let mut context = RetrievalContext::new(persona, content_type);
            if let Some(seed) = seed_text {
                context = context.with_seed_text(seed);
            }
            rank(&config, &pool, context, k, arm.as_deref()).await
        }
        Commands::CheckCopy {
            pool,
            candidate,
            hook,
            caption,
            cta,
            persona,
            content_type,
        } => {
            let config = load_config(cli.config.as_deref(), cli.embedder.as_deref())?;
            let context = RetrievalContext::new(persona, content_type);
            let mut candidate = GeneratedCandidate::new(candidate);
            for (role, text) in [
                (FragmentRole::Hook, hook),
                (FragmentRole::Caption, caption),
                (FragmentRole::Cta, cta),
            ] {
                if let Some(text) = text {
                    candidate = candidate.with_fragment(role, text);
                }
            }
            check_copy(&config, &pool, &candidate, context).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(cli.config.as_deref(), cli.embedder.as_deref())?;
                let rendered = toml::to_string_pretty(&config)
                    .map_err(|e| CalliopeError::Config(e.to_string()))?;
                println!("{}", rendered);
                Ok(())
            }
            ConfigAction::Validate { path } => {
                let path = path.or(cli.config).ok_or_else(|| {
                    CalliopeError::InvalidInput("no configuration file given".to_string())
                })?;
                EngineConfig::from_file(&path)?;
                println!("{} is valid", path.display());
                Ok(())
            }
        },
    }
}
