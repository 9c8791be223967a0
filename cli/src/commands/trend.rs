use anyhow::{Context, Result, bail};
use chrono::Utc;

use innerscan_core::db::Database;
use innerscan_core::models::Trend;
use innerscan_core::portal::{PortalClient, PortalConfig};
use innerscan_core::service::{Synchronizer, window_start};

use super::helpers::{delta, print_trend_table};

/// Show the last `days` days of measurements, refreshing first unless `portal` is `None`.
pub(crate) async fn cmd_trend<C: PortalClient>(
    db: &Database,
    portal: Option<(&C, &PortalConfig)>,
    days: u32,
    json: bool,
) -> Result<()> {
    if days == 0 {
        bail!("--days must be at least 1");
    }

    let now = Utc::now();
    let trend = match portal {
        Some((client, config)) => {
            Synchronizer::new(db, client, config)
                .trend(days, now)
                .await?
        }
        None => {
            let since = window_start(days, now)
                .with_context(|| format!("--days {days} reaches past the supported date range"))?;
            let records = db.get_records_since(since)?;
            Trend::from_records(&records)
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&trend)?);
    } else if trend.is_empty() {
        eprintln!("No measurements in the last {days} day(s). Run `innerscan sync` to fetch.");
    } else {
        print_trend_table(&trend);
        if let Some(d) = delta(&trend.weight) {
            println!("Weight change over {} measurement(s): {d:+.1} kg", trend.len());
        }
    }

    Ok(())
}
