use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scheme_rag::config::Settings;
use scheme_rag::corpus::CorpusLoader;
use scheme_rag::prompt::build_prompt;
use scheme_rag::provider::{provider_from_settings, EmbeddingProvider};
use scheme_rag::{RetrievalError, Retriever};

#[derive(Parser)]
#[command(name = "scheme-rag")]
#[command(version = "0.1")]
#[command(about = "Semantic retrieval over a government schemes corpus", long_about = None)]
struct Cli {
    /// Corpus CSV, overriding the configured path.
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore or build the index.
    Build {
        /// Rebuild even if a current index is persisted.
        #[arg(long)]
        force: bool,
    },
    /// Print the best matching schemes as JSON.
    Search(QueryArgs),
    /// Print the generation prompt built from the best matches.
    Prompt(QueryArgs),
    /// Report whether the persisted index is present and current.
    Status,
    /// Delete the persisted index.
    Clean,
    /// Print the effective configuration.
    Config,
}

#[derive(clap::Args)]
struct QueryArgs {
    query: String,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    min_score: Option<f32>,
}

type DynRetriever = Retriever<Box<dyn EmbeddingProvider>>;

fn open_retriever(settings: &Settings) -> Result<DynRetriever> {
    let provider = provider_from_settings(&settings.embedding)?;
    Ok(Retriever::new(provider, settings))
}

fn build_command(settings: &Settings, force: bool) -> Result<()> {
    let retriever = open_retriever(settings)?;
    let outcome = retriever.initialize(&settings.corpus_path, force)?;
    println!(
        "{:?}: {} documents indexed at {}",
        outcome,
        retriever.document_count().unwrap_or(0),
        retriever.store().index_path().display()
    );
    Ok(())
}

fn run_query(settings: &Settings, args: &QueryArgs) -> Result<Vec<scheme_rag::SearchResult>> {
    let retriever = open_retriever(settings)?;
    retriever.initialize(&settings.corpus_path, false)?;
    let top_k = args.top_k.unwrap_or(settings.search.top_k);
    let min_score = args.min_score.unwrap_or(settings.search.min_score);
    Ok(retriever.search(&args.query, top_k, min_score)?)
}

fn search_command(settings: &Settings, args: &QueryArgs) -> Result<()> {
    let results = run_query(settings, args)?;
    let output = serde_json::json!({
        "query": args.query,
        "results": results,
        "actual_results_count": results.len(),
        "requested_results_count": args.top_k.unwrap_or(settings.search.top_k),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn prompt_command(settings: &Settings, args: &QueryArgs) -> Result<()> {
    let results = run_query(settings, args)?;
    print!(
        "{}",
        build_prompt(&args.query, &results, settings.prompt.max_passage_chars)
    );
    Ok(())
}

fn status_command(settings: &Settings) -> Result<()> {
    let retriever = open_retriever(settings)?;
    let store = retriever.store();
    if !store.is_valid() {
        println!("missing: no index at {}", store.index_path().display());
        return Ok(());
    }
    let corpus = CorpusLoader::load(&settings.corpus_path)?;
    match store.load() {
        Ok((index, metadata)) => {
            let encoder = retriever.encoder();
            let dimension = encoder.probe_dimension()?;
            match metadata.staleness(&corpus.fingerprint, encoder.embedder_id(), dimension) {
                Some(reason) => println!("stale: {}", reason),
                None => println!(
                    "current: {} vectors of dimension {} ({})",
                    index.len(),
                    index.dimension(),
                    metadata.embedder_id
                ),
            }
        }
        Err(e @ RetrievalError::IndexCorrupt { .. }) => println!("corrupt: {}", e),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn clean_command(settings: &Settings) -> Result<()> {
    let retriever = open_retriever(settings)?;
    retriever.store().clear()?;
    println!("removed index at {}", retriever.store().index_path().display());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let args = Cli::parse();
    let mut settings = Settings::load().context("failed to load configuration")?;
    if let Some(corpus) = args.corpus {
        settings.corpus_path = corpus;
    }

    match args.command {
        Commands::Build { force } => build_command(&settings, force)?,
        Commands::Search(q) => search_command(&settings, &q)?,
        Commands::Prompt(q) => prompt_command(&settings, &q)?,
        Commands::Status => status_command(&settings)?,
        Commands::Clean => clean_command(&settings)?,
        Commands::Config => settings.print_config(),
    }
    Ok(())
}
