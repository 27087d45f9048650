use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cycle_knowledge::{EmbeddingMode, IndexBackend, KnowledgeConfig};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "cycle-kb")]
#[command(about = "Searchable knowledge base for lab cycles", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collections directory (overrides CYCLE_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Embedding family (overrides CYCLE_EMBEDDING_MODE)
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Model cache directory (overrides CYCLE_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Dense model id (overrides CYCLE_EMBEDDING_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Vector index implementation (overrides CYCLE_INDEX_BACKEND)
    #[arg(long, global = true, value_enum)]
    index_backend: Option<BackendFlag>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new collection
    Create(CreateArgs),

    /// List collections
    List(JsonArgs),

    /// Show a collection and its documents
    Show(ShowArgs),

    /// Add a document (text from --file or stdin)
    Add(AddArgs),

    /// Register a lab session with a collection
    Session(SessionArgs),

    /// Rebuild the index of a collection
    Build(BuildArgs),

    /// Search a collection
    Query(QueryArgs),

    /// Print retrieved context formatted for a prompt
    Context(ContextArgs),
}

#[derive(Args)]
struct JsonArgs {
    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CreateArgs {
    /// Collection id
    id: String,

    /// Display title (defaults to the id)
    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ShowArgs {
    /// Collection id
    id: String,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct AddArgs {
    /// Collection id
    collection: String,

    /// Read the document text from this file instead of stdin
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long)]
    title: Option<String>,

    /// Document id (generated when omitted)
    #[arg(long = "id")]
    document_id: Option<String>,

    /// Metadata entry; values that parse as JSON are stored as JSON
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    meta: Vec<(String, String)>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SessionArgs {
    /// Collection id
    collection: String,

    /// Session id
    session: String,

    /// Session info entry; values that parse as JSON are stored as JSON
    #[arg(long = "info", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    info: Vec<(String, String)>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct BuildArgs {
    /// Collection id
    collection: String,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Collection id
    collection: String,

    /// Search query
    query: String,

    /// Maximum number of results
    #[arg(long, short = 'n')]
    max_results: Option<usize>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ContextArgs {
    /// Collection id
    collection: String,

    /// Search query
    query: String,

    /// Maximum number of results
    #[arg(long, short = 'n')]
    max_results: Option<usize>,
}

#[derive(Copy, Clone, ValueEnum)]
enum EmbedMode {
    Auto,
    Dense,
    Sparse,
}

impl EmbedMode {
    const fn as_domain(self) -> EmbeddingMode {
        match self {
            Self::Auto => EmbeddingMode::Auto,
            Self::Dense => EmbeddingMode::Dense,
            Self::Sparse => EmbeddingMode::Sparse,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum BackendFlag {
    Exact,
    BruteForce,
}

impl BackendFlag {
    const fn as_domain(self) -> IndexBackend {
        match self {
            Self::Exact => IndexBackend::Exact,
            Self::BruteForce => IndexBackend::BruteForce,
        }
    }
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Cli {
    fn json_output(&self) -> bool {
        match &self.command {
            Commands::Create(args) => args.json,
            Commands::List(args) => args.json,
            Commands::Show(args) => args.json,
            Commands::Add(args) => args.json,
            Commands::Session(args) => args.json,
            Commands::Build(args) => args.json,
            Commands::Query(args) => args.json,
            Commands::Context(_) => false,
        }
    }

    /// File and environment settings with the command-line flags applied on top
    fn resolve_config(&self) -> Result<KnowledgeConfig> {
        let mut config = KnowledgeConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(mode) = self.embed_mode {
            config.embedding.mode = mode.as_domain();
        }
        if let Some(dir) = &self.model_dir {
            config.embedding.model_dir = Some(dir.clone());
        }
        if let Some(model) = &self.model {
            config.embedding.model_id = model.clone();
        }
        if let Some(backend) = self.index_backend {
            config.index_backend = backend.as_domain();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON parsing
    if cli.json_output() {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // Always silence ort crate unless verbose mode (ORT is extremely noisy)
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = cli.resolve_config()?;
    log::debug!("Using data dir {}", config.data_dir.display());

    match cli.command {
        Commands::Create(args) => commands::run_create(&config, args).await,
        Commands::List(args) => commands::run_list(&config, args.json).await,
        Commands::Show(args) => commands::run_show(&config, args).await,
        Commands::Add(args) => commands::run_add(&config, args).await,
        Commands::Session(args) => commands::run_session(&config, args).await,
        Commands::Build(args) => commands::run_build(&config, args).await,
        Commands::Query(args) => commands::run_query(&config, args).await,
        Commands::Context(args) => commands::run_context(&config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("temp=37").unwrap(),
            ("temp".to_string(), "37".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
