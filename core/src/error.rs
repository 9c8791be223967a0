use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures of the fetch → parse → map → store pipeline.
///
/// Only [`SyncError::LoginFailed`] is recovered locally (by the retry loop in
/// [`crate::portal::fetch_valid_page`]); everything else aborts the current
/// sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("login rejected with HTTP {status}")]
    Auth { status: u16 },

    #[error("page does not show an authenticated session")]
    LoginFailed,

    #[error("request for {requested} was redirected to {landed}")]
    Redirect { requested: String, landed: String },

    #[error("fetching {url} failed with HTTP {status}")]
    Fetch { url: String, status: u16 },

    #[error("page structure not recognized: {0}")]
    Parse(String),

    #[error("measurement `{label}` is missing or not numeric")]
    Mapping { label: String },

    #[error("invalid range: {since} is after {until}")]
    Range {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },

    #[error("a trend window of {num_days} day(s) is not supported")]
    Window { num_days: u32 },

    #[error("still not logged in after {attempts} attempt(s)")]
    RetryExhausted { attempts: u32 },

    #[error("transport failure: {0:#}")]
    Transport(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
