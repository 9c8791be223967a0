use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::SyncError;
use crate::models::{MeasurementRecord, SyncReport, Trend};
use crate::parse::{HiddenFormExtractor, RecordExtractor};
use crate::portal::{PortalClient, PortalConfig, fetch_valid_page};

/// Watermark age after which a read triggers a sync first.
pub const STALE_AFTER_HOURS: i64 = 6;

/// Start of a `num_days` trend window ending at `now`.
///
/// `None` for an empty window or one reaching past the representable date range.
#[must_use]
pub fn window_start(num_days: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if num_days == 0 {
        return None;
    }
    now.checked_sub_signed(Duration::days(i64::from(num_days)))
}

/// Drives the fetch → parse → map → store pipeline over a date range.
///
/// Borrows the store handle opened at process start; days are processed one
/// at a time, in order.
pub struct Synchronizer<'a, C, E = HiddenFormExtractor> {
    db: &'a Database,
    client: &'a C,
    config: &'a PortalConfig,
    extractor: E,
}

impl<'a, C: PortalClient> Synchronizer<'a, C> {
    pub fn new(db: &'a Database, client: &'a C, config: &'a PortalConfig) -> Self {
        Self::with_extractor(db, client, config, HiddenFormExtractor)
    }
}

impl<'a, C: PortalClient, E: RecordExtractor> Synchronizer<'a, C, E> {
    pub fn with_extractor(
        db: &'a Database,
        client: &'a C,
        config: &'a PortalConfig,
        extractor: E,
    ) -> Self {
        Self {
            db,
            client,
            config,
            extractor,
        }
    }

    /// Fetch and map the records on the portal page for the JST day containing `date_utc`.
    ///
    /// Records come back oldest first.
    pub async fn fetch_day(&self, date_utc: DateTime<Utc>) -> Result<Vec<MeasurementRecord>, SyncError> {
        let url = self.config.day_url(date_utc);
        let page = fetch_valid_page(
            self.client,
            &url,
            &self.config.credentials,
            &self.config.retry,
        )
        .await?;

        let mut parsed = self.extractor.extract(&page.html, page.fetched_at)?;
        parsed.sort_by_key(|p| p.record_date);
        parsed.iter().map(MeasurementRecord::try_from).collect()
    }

    /// Synchronize every day from `since` through `until` plus one extra day.
    ///
    /// The first failing day aborts the run; days already written stay written.
    pub async fn sync_range(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        if since > until {
            return Err(SyncError::Range { since, until });
        }

        // One day past `until` to pick up records filed under the next JST date.
        let end = until + Duration::days(1);
        let mut cursor = since;
        let mut report = SyncReport {
            days_fetched: 0,
            records_written: 0,
            watermark: None,
        };

        while cursor <= end {
            info!(date = %cursor, "fetching records");
            let records = self.fetch_day(cursor).await?;
            report.days_fetched += 1;
            info!(count = records.len(), "fetched records");

            if let Some(last) = records.last() {
                self.db.put_records(&records)?;
                report.records_written += records.len();
                report.watermark = Some(last.fetch_date);
            }
            cursor += Duration::days(1);
        }

        if let Some(watermark) = report.watermark {
            self.db.set_watermark(watermark)?;
            info!(%watermark, written = report.records_written, "sync complete");
        }
        Ok(report)
    }

    /// Whether the watermark is older than [`STALE_AFTER_HOURS`] at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> Result<bool, SyncError> {
        let watermark = self.db.get_watermark(now)?;
        Ok(now - watermark > Duration::hours(STALE_AFTER_HOURS))
    }

    /// Sync from the watermark up to `now` unless a sync ran recently.
    pub async fn refresh_if_stale(&self, now: DateTime<Utc>) -> Result<Option<SyncReport>, SyncError> {
        if !self.is_stale(now)? {
            debug!("watermark is fresh; skipping sync");
            return Ok(None);
        }
        let since = self.db.get_watermark(now)?;
        self.sync_range(since, now).await.map(Some)
    }

    /// Refresh if stale, then return the last `num_days` days of records.
    pub async fn trend(&self, num_days: u32, now: DateTime<Utc>) -> Result<Trend, SyncError> {
        let since = window_start(num_days, now).ok_or(SyncError::Window { num_days })?;
        self.refresh_if_stale(now).await?;
        let records = self.db.get_records_since(since)?;
        Ok(Trend::from_records(&records))
    }
}
