//! pubmed-rag CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use pubmed_rag::{
    commands::{
        cmd_ask, cmd_ingest, cmd_init, cmd_search, cmd_status, print_ingest_stats, print_init,
        print_search_results, print_status, run_chat, IngestOptions, InitOptions,
    },
    config::Config,
    corpus::Corpus,
    embed::create_embedder,
    error::{Error, Result},
    llm::create_generator,
    meta::MetaDb,
    progress::LogWriterFactory,
    rag::{Mode, RagEngine},
    retrieve::Retriever,
    session::ChatSession,
    store::{InMemoryIndex, QdrantIndex, VectorIndex},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pubmed-rag")]
#[command(
    version,
    about = "Question answering over PubMed abstracts with a binary-quantized Qdrant index",
    long_about = None
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the ingestion ledger
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Load the precomputed abstract embeddings into the quantized collection
    Ingest {
        /// Rows per upload batch (defaults to ingest.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stop after this many corpus rows
        #[arg(long)]
        limit: Option<usize>,

        /// Load into the collection even if it already exists
        #[arg(long)]
        resume: bool,

        /// Clear a stale running ingestion for the collection
        #[arg(long)]
        force: bool,

        /// Ingest into an in-memory index instead of Qdrant
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve the abstracts nearest to a query
    Search {
        /// The search query
        query: String,

        /// Number of abstracts to return (defaults to retrieval.top_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Answer a single question
    Ask {
        /// The question
        question: String,

        /// rag: grounded answer; retrieval: show the retrieved context
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Interactive question answering
    Chat {
        /// Starting mode (switch with /mode)
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Show system status
    Status {
        /// Also list this many recent ingestion runs
        #[arg(long, default_value_t = 0)]
        runs: u32,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_config_path);

    match cli.command {
        Commands::Init { force } => {
            let config = cmd_init(InitOptions {
                config_path,
                force,
                probe_index: true,
            })
            .await?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "ok",
                        "config": config.paths.config_file,
                        "state_db": config.paths.state_db,
                    })
                );
            } else {
                print_init(&config);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "pubmed-rag", &mut std::io::stdout());
        }

        Commands::Ingest {
            batch_size,
            limit,
            resume,
            force,
            dry_run,
        } => {
            let config = load_config(&config_path)?;
            let corpus = Corpus::connect(&config.corpus).await?;

            let mut options = IngestOptions::new(config.collection_spec());
            options.batch_size = batch_size.unwrap_or(config.ingest.batch_size);
            options.limit = limit;
            options.resume = resume;
            options.force = force;

            let stats = if dry_run {
                let index = InMemoryIndex::new();
                let ledger = MetaDb::in_memory().await?;
                cmd_ingest(&corpus, &index, &ledger, &options).await?
            } else {
                let index = QdrantIndex::connect(&config)?;
                let ledger = MetaDb::connect(&config).await?;
                cmd_ingest(&corpus, &index, &ledger, &options).await?
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_ingest_stats(&stats, dry_run);
            }
        }

        Commands::Search { query, k } => {
            let config = load_config(&config_path)?;
            let retriever = build_retriever(&config)?;
            let top_k = k.unwrap_or(config.retrieval.top_k);

            let results = cmd_search(&retriever, &query, top_k).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_search_results(&results);
            }
        }

        Commands::Ask { question, mode } => {
            let config = load_config(&config_path)?;
            let engine = build_engine(&config)?;
            let session = ChatSession::new(mode.unwrap_or(config.chat.default_mode));

            if cli.json {
                let answer =
                    cmd_ask(&engine, &session, &question, Duration::ZERO, &mut std::io::sink())
                        .await?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "question": question,
                        "mode": session.mode(),
                        "answer": answer,
                    }))?
                );
            } else {
                let pacing = config.chat.pacing(session.mode());
                cmd_ask(&engine, &session, &question, pacing, &mut std::io::stdout()).await?;
            }
        }

        Commands::Chat { mode } => {
            let config = load_config(&config_path)?;
            let engine = build_engine(&config)?;
            let mut session = ChatSession::new(mode.unwrap_or(config.chat.default_mode));

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_chat(
                &engine,
                &config.chat,
                &mut session,
                stdin,
                &mut std::io::stdout(),
            )
            .await?;
        }

        Commands::Status { runs } => {
            let config = load_config(&config_path)?;
            let ledger = MetaDb::connect(&config).await?;
            let index = QdrantIndex::connect(&config)?;

            let status = cmd_status(&config, &ledger, &index, runs).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn load_config(config_path: &std::path::Path) -> Result<Config> {
    if !config_path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}. Run 'pubmed-rag init' first.",
            config_path.display()
        )));
    }

    Config::load(config_path)
}

fn build_retriever(config: &Config) -> Result<Retriever> {
    let embedder = create_embedder(&config.embedding)?;
    let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::connect(config)?);
    Ok(Retriever::from_config(config, embedder, index))
}

fn build_engine(config: &Config) -> Result<RagEngine> {
    let retriever = build_retriever(config)?;
    let generator = create_generator(&config.llm)?;
    Ok(RagEngine::from_config(config, retriever, generator))
}
