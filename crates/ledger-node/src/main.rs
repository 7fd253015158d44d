use clap::Parser;
use ledger_core::{Ledger, MineControl, SharedLedger};
use ledger_node::{config::NodeConfig, run, AppState};
use std::{net::SocketAddr, path::PathBuf};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "ledger-node", about = "Single-process proof-of-work ledger node")]
struct Args {
    /// TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:5000
    #[arg(long)]
    listen: Option<String>,

    /// Leading zero hex digits required of block hashes
    #[arg(long)]
    difficulty: Option<usize>,

    /// Give up a mining attempt after this many nonces (genesis is always mined unbounded)
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Give up a mining attempt after this many milliseconds (not applied to genesis)
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Search nonces on all cores
    #[arg(long)]
    parallel: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(difficulty) = self.difficulty {
            config.ledger.difficulty = difficulty;
        }
        if self.max_iterations.is_some() {
            config.ledger.max_iterations = self.max_iterations;
        }
        if self.deadline_ms.is_some() {
            config.ledger.deadline_ms = self.deadline_ms;
        }
        if self.parallel {
            config.ledger.parallel = true;
        }
        config.ledger.validate()?;
        Ok(config)
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Args::parse().into_config()?;
    let ledger = SharedLedger::new(Ledger::new(config.ledger.clone())?);

    let state = AppState::new(ledger.clone());

    // Mining budgets apply to requests only; ctrl-c still stops genesis.
    let control = MineControl::unbounded().with_cancel(state.shutdown.clone());
    let init = tokio::task::spawn_blocking(move || ledger.init_with(&control));
    let genesis = tokio::select! {
        res = init => res??,
        _ = shutdown_signal() => {
            state.shutdown.cancel();
            return Ok(());
        }
    };
    info!(hash = genesis.hash(), difficulty = config.ledger.difficulty, "genesis ready");

    let addr: SocketAddr = config.listen.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ledger-node listening on http://{addr}");
    run(listener, state, shutdown_signal()).await?;
    Ok(())
}
