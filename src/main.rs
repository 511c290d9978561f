//! # KnowledgeForge CLI (`kforge`)
//!
//! ## Usage
//!
//! ```bash
//! kforge --config ./config/kforge.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kforge init` | Create the SQLite database and run schema migrations |
//! | `kforge serve` | Start the HTTP/WebSocket API server |
//! | `kforge issue-token <user-id>` | Mint a bearer token for a user |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use knowledgeforge::auth::HmacTokenVerifier;
use knowledgeforge::config;
use knowledgeforge::embedding;
use knowledgeforge::indexer::{IndexLocks, Indexer};
use knowledgeforge::llm::{LlmService, OpenAiCompatibleProvider};
use knowledgeforge::memory::ChatMemory;
use knowledgeforge::rate_limit::RateLimiter;
use knowledgeforge::server::{run_server, AppState};
use knowledgeforge::store::{self, SqliteStore};

/// KnowledgeForge — retrieval-augmented question answering over your
/// own documents.
#[derive(Parser)]
#[command(
    name = "kforge",
    about = "KnowledgeForge — retrieval-augmented question answering over private documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents/chats tables.
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP/WebSocket API server.
    Serve,

    /// Mint a bearer token for a user id using the configured secret.
    IssueToken {
        /// User id (alphanumeric, `-`, `_`).
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = store::connect(&cfg).await?;
            store::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let pool = store::connect(&cfg).await?;
            store::run_migrations(&pool).await?;
            let chat_store = Arc::new(SqliteStore::new(pool));

            let embedder = embedding::create_provider(&cfg.embedding)?;
            let provider = Arc::new(OpenAiCompatibleProvider::new(&cfg.generation)?);
            let llm = Arc::new(LlmService::new(provider, chat_store, &cfg.generation));

            let verifier = Arc::new(HmacTokenVerifier::new(
                cfg.auth.resolve_secret()?.into_bytes(),
            ));

            let state = AppState {
                memory: Arc::new(ChatMemory::new(cfg.memory.max_turns, cfg.memory.max_tokens)),
                rate_limiter: Arc::new(RateLimiter::new(&cfg.rate_limit)),
                verifier,
                llm,
                indexer: Arc::new(Indexer::new(
                    cfg.embedding.dims,
                    cfg.storage.vector_store_root(),
                    cfg.chunking.clone(),
                    embedder.clone(),
                )),
                index_locks: Arc::new(IndexLocks::new()),
                embedder,
                config: Arc::new(cfg),
            };

            run_server(state).await?;
        }
        Commands::IssueToken { user_id } => {
            let verifier = HmacTokenVerifier::new(cfg.auth.resolve_secret()?.into_bytes());
            println!("{}", verifier.issue(&user_id));
        }
    }

    Ok(())
}
