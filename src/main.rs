//! shardwise: inspect routing decisions and server reachability

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use shardwise::core::{DEFAULT_PORT, split_host_port};
use shardwise::{
    Connector, DbHandle, DriverError, Router, RouterConfig, ServerDescriptor, Session, TcpProber,
    Topology,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "shardwise")]
#[command(about = "Query routing for replicated, sharded SQL databases", long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show where a statement would be routed
    Explain {
        /// Topology JSON file
        #[arg(long)]
        topology: PathBuf,

        /// Router config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Treat the statement as part of a writes-only session
        #[arg(long)]
        writes_only: bool,

        /// SQL statement
        sql: String,
    },
    /// Check whether a database server accepts TCP connections
    Probe {
        /// host[:port]
        address: String,

        /// Connect timeout in milliseconds
        #[arg(long, default_value = "200")]
        timeout_ms: u64,
    },
}

/// Connector for commands that must never open a database connection.
struct Offline;

#[async_trait]
impl Connector for Offline {
    async fn connect(
        &self,
        server: &ServerDescriptor,
        _persistent: bool,
    ) -> std::result::Result<Box<dyn DbHandle>, DriverError> {
        Err(DriverError::new(
            None,
            format!("offline: not connecting to {}", server.host_and_port()),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;

    match args.command {
        Command::Explain {
            topology,
            config,
            writes_only,
            sql,
        } => explain(topology, config, writes_only, &sql),
        Command::Probe {
            address,
            timeout_ms,
        } => probe(&address, Duration::from_millis(timeout_ms)).await,
    }
}

fn explain(
    topology: PathBuf,
    config: Option<PathBuf>,
    writes_only: bool,
    sql: &str,
) -> Result<()> {
    let json = std::fs::read_to_string(&topology)
        .with_context(|| format!("reading {}", topology.display()))?;
    let topology = Topology::from_json(&json)?;

    let config = match config {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            RouterConfig::from_json(&json)?
        }
        None => RouterConfig::default(),
    };

    let router = Router::builder(topology, Arc::new(Offline))
        .config(config)
        .build()?;

    let mut session = Session::new();
    if writes_only {
        session.send_writes_only();
    }

    let plan = router.explain(&session, sql)?;
    println!("{}", plan);
    Ok(())
}

async fn probe(address: &str, timeout: Duration) -> Result<()> {
    let (host, port) = split_host_port(address);
    let port = port.unwrap_or(DEFAULT_PORT);

    let prober = TcpProber::default();
    let up = prober.probe(&host, port, timeout).await;
    println!("{}:{} {}", host, port, if up { "up" } else { "down" });

    if !up {
        std::process::exit(1);
    }
    Ok(())
}
