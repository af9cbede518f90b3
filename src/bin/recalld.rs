//! `recalld` - the recall engine's standalone server process.
//!
//! Reads configuration from the process environment (`RECALL_DATA_ROOT`,
//! `RECALL_EMBEDDING_MODE`, `LLM_RELATION_MODE`, ...), opens an [`Engine`],
//! and serves the HTTP API until interrupted.
use clap::Parser;
use recall::{Config, Engine};
use std::net::SocketAddr;
use tokio::signal;

/// recalld - persistent memory server for conversational agents.
#[derive(Parser)]
#[command(name = "recalld")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override RECALL_DATA_ROOT: where volumes, indexes, and scope data live.
    #[arg(long)]
    data_root: Option<std::path::PathBuf>,

    /// Override the HTTP bind address (host:port).
    #[arg(long)]
    bind: Option<String>,

    /// Log level: error, warn, info, debug, trace. Overrides RECALL_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.log_level {
        Some(level) => recall::init_logging_with_level(level),
        None => recall::init_logging(),
    }

    let mut config = Config::from_env();
    if let Some(data_root) = cli.data_root {
        config.data_root = data_root;
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    tracing::info!(data_root = %config.data_root.display(), bind = %config.bind_addr, "starting recalld");

    let bind_addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {e}", config.bind_addr))?;
    let bind_str = bind_addr.to_string();

    let engine = Engine::open(config).await?;
    let server = recall::http::HttpServer::new(engine.clone());

    let shutdown = async {
        signal::ctrl_c().await.ok();
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = server.bind(&bind_str) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server exited with an error");
            }
        }
        _ = shutdown => {}
    }

    engine.close().await?;
    tracing::info!("recalld stopped");
    Ok(())
}
