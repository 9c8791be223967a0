use anyhow::Result;
use chrono::Utc;

use innerscan_core::db::Database;
use innerscan_core::portal::{PortalClient, PortalConfig};
use innerscan_core::service::Synchronizer;

use super::helpers::{format_local, parse_instant};

pub(crate) async fn cmd_sync<C: PortalClient>(
    db: &Database,
    client: &C,
    config: &PortalConfig,
    since: Option<String>,
    until: Option<String>,
    json: bool,
) -> Result<()> {
    let now = Utc::now();
    let since = match since {
        Some(s) => parse_instant(&s)?,
        None => db.get_watermark(now)?,
    };
    let until = match until {
        Some(s) => parse_instant(&s)?,
        None => now,
    };
    let report = Synchronizer::new(db, client, config)
        .sync_range(since, until)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Fetched {} day(s), stored {} record(s)",
            report.days_fetched, report.records_written
        );
        match report.watermark {
            Some(ts) => println!("  Last fetch: {}", format_local(&ts)),
            None => println!("  No new measurements; last fetch unchanged"),
        }
    }

    Ok(())
}
