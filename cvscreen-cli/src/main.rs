//! `cvscreen`: ingest a directory of CVs and ask questions about it.
//!
//! Configuration comes from the environment (and a `.env` file); see
//! [`RagConfig::from_env`]. Logs go to stderr, results to stdout.
//!
//! ```bash
//! USE_MOCK_GENERATORS=true cvscreen ingest --corpus static/cvs
//! RUST_LOG=cvscreen_rag=debug cvscreen ask "Who has Go experience?" --sources
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cvscreen_rag::{DirectoryCorpusReader, RagConfig, RagEngine, RagError, VectorIndex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "cvscreen")]
#[command(about = "Answer questions about a corpus of candidate CVs", long_about = None)]
struct Cli {
    /// Directory holding the plain-text CVs
    #[arg(long, global = true, env = "STATIC_DIR", default_value = "static")]
    corpus: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the vector index from the corpus
    Ingest,
    /// Answer a question from the indexed CVs
    Ask {
        /// The question to answer
        question: String,
        /// Also print the files the answer was grounded on
        #[arg(long)]
        sources: bool,
    },
    /// Show the index location and contents
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    if let Err(e) = init_tracing() {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RagConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Ingest => {
            let engine = engine(config, cli.corpus)?;
            let documents = engine.ingest().await?;
            println!("Ingested {documents} documents into {}", engine.index_dir().display());
        }
        Commands::Ask { question, sources } => {
            let engine = engine(config, cli.corpus)?;
            let answer = engine.answer_with_context(&question).await?;
            println!("{}", answer.text);
            if sources {
                println!();
                for source in answer.context.sources() {
                    println!("- {source}");
                }
            }
        }
        Commands::Status => status(&config).await?,
    }
    Ok(())
}

fn engine(config: RagConfig, corpus: PathBuf) -> anyhow::Result<RagEngine> {
    tracing::debug!(corpus = %corpus.display(), "using corpus directory");
    let reader = Arc::new(DirectoryCorpusReader::new(corpus));
    Ok(RagEngine::from_config(config, reader)?)
}

async fn status(config: &RagConfig) -> anyhow::Result<()> {
    println!("backend:         {}", config.backend);
    println!("embedding model: {}", config.embedding_model);
    println!("chat model:      {}", config.chat_model);
    println!("index dir:       {}", config.index_dir.display());

    match VectorIndex::load(&config.index_dir).await {
        Ok(index) => {
            println!(
                "index:           {} passages, {} dimensions",
                index.len(),
                index.dimensions()
            );
            println!("built with:      {}", index.embedding_model());
            println!("built at:        {}", index.created_at().to_rfc3339());
        }
        Err(RagError::IndexNotFound { message, .. }) => {
            println!("index:           none ({message})");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Client-correctable failures exit with 2, everything else with 1.
fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<RagError>() {
        Some(e) if e.is_client_error() => 2,
        _ => 1,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to create env filter")?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}
