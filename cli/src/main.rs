mod commands;
mod config;
mod portal;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{cmd_reset, cmd_status, cmd_sync, cmd_trend};
use crate::config::{Config, PortalArgs};
use crate::portal::HealthPlanetClient;
use innerscan_core::db::Database;

const DEFAULT_LOG_FILTER: &str = "innerscan=info,innerscan_core=info";

#[derive(Parser)]
#[command(
    name = "innerscan",
    version,
    about = "Sync body-composition measurements from Health Planet",
    long_about = "Logs in to the Health Planet portal, scrapes the daily innerscan pages \
                  (weight, body fat, muscle, visceral fat, BMR, body age, bone mass) into a \
                  local SQLite store and shows the trend."
)]
struct Cli {
    /// Path to the SQLite database (default: platform data directory)
    #[arg(long, global = true, env = "INNERSCAN_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(flatten)]
    portal: PortalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch measurements from the portal into the local store
    Sync {
        /// First day to fetch (YYYY-MM-DD or RFC 3339, default: last fetch time)
        #[arg(long)]
        since: Option<String>,
        /// Last day to fetch (YYYY-MM-DD or RFC 3339, default: now)
        #[arg(long)]
        until: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show measurements for the last N days, syncing first if the data is stale
    Trend {
        /// Number of days to show
        #[arg(short, long, default_value = "30")]
        days: u32,
        /// Only read the local store
        #[arg(long)]
        no_refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show last fetch time, record count and whether a refresh is due
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget the last fetch time so the next sync uses the default lookback
    Reset {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the trend HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Sync { since, until, json } => {
            let portal = cli.portal.portal_config()?;
            let client = HealthPlanetClient::new(portal.login_url.clone())?;
            cmd_sync(&db, &client, &portal, since, until, json).await
        }
        Commands::Trend {
            days,
            no_refresh,
            json,
        } => {
            if no_refresh {
                cmd_trend::<HealthPlanetClient>(&db, None, days, json).await
            } else {
                let portal = cli.portal.portal_config()?;
                let client = HealthPlanetClient::new(portal.login_url.clone())?;
                cmd_trend(&db, Some((&client, &portal)), days, json).await
            }
        }
        Commands::Status { json } => cmd_status(&db, json),
        Commands::Reset { json } => cmd_reset(&db, json),
        Commands::Serve { port, bind } => {
            let portal = cli.portal.portal_config()?;
            let client = HealthPlanetClient::new(portal.login_url.clone())?;
            server::start_server(db, client, portal, port, &bind).await
        }
    }
}
