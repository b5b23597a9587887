//! # docrag CLI
//!
//! ```bash
//! docrag --config ./config/docrag.toml init    # create the SQLite schema
//! docrag --config ./config/docrag.toml serve   # start the HTTP server
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use docrag::config::{self, Config};
use docrag::context::AppContext;
use docrag::{db, logging, migrate, server};

/// Document ingestion and retrieval-augmented question answering.
#[derive(Parser)]
#[command(name = "docrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the document-store schema. Idempotent.
    Init,
    /// Start the HTTP server. Ctrl-C drains background ingestion and exits.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => init(&cfg).await?,
        Commands::Serve => serve(cfg).await?,
    }
    Ok(())
}

async fn init(cfg: &Config) -> anyhow::Result<()> {
    if cfg.db.provider == "memory" {
        println!("db.provider is 'memory'; nothing to initialize.");
        return Ok(());
    }
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized at {}", cfg.db.path.display());
    Ok(())
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::build(cfg).await?);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };
    let served = server::run_server(ctx.clone(), shutdown).await;
    ctx.shutdown().await;
    served
}
