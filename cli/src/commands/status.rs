use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;

use innerscan_core::db::{DEFAULT_LOOKBACK_DAYS, Database};
use innerscan_core::service::STALE_AFTER_HOURS;

use super::helpers::format_local;

#[derive(Serialize)]
struct Status {
    last_fetch: Option<String>,
    next_sync_from: String,
    records: i64,
    stale: bool,
}

pub(crate) fn cmd_status(db: &Database, json: bool) -> Result<()> {
    let now = Utc::now();
    let last_fetch = db.get_last_fetch()?;
    let watermark = db.get_watermark(now)?;
    let status = Status {
        last_fetch: last_fetch.map(|ts| ts.to_rfc3339()),
        next_sync_from: watermark.to_rfc3339(),
        records: db.count_records()?,
        stale: now - watermark > Duration::hours(STALE_AFTER_HOURS),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        match last_fetch {
            Some(ts) => println!("Last fetch:   {}", format_local(&ts)),
            None => println!("Last fetch:   never (next sync looks back {DEFAULT_LOOKBACK_DAYS} days)"),
        }
        println!("Records:      {}", status.records);
        println!(
            "Refresh:      {}",
            if status.stale {
                "due on next trend read"
            } else {
                "not needed"
            }
        );
    }

    Ok(())
}

/// Forget the last fetch so the next sync starts from the default lookback.
pub(crate) fn cmd_reset(db: &Database, json: bool) -> Result<()> {
    let cleared = db.clear_watermark()?;

    if json {
        println!("{}", serde_json::json!({ "cleared": cleared }));
    } else if cleared {
        println!("Cleared last fetch time");
    } else {
        println!("No last fetch time recorded");
    }

    Ok(())
}
