//! Authenticated access to the measurement portal.
//!
//! The HTTP transport lives behind [`PortalClient`]; this module owns what
//! sits on top of it: Shift-JIS decoding, detection of a lost login, and the
//! bounded login → fetch → validate retry loop.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use encoding_rs::SHIFT_JIS;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::session::{Credentials, SessionToken};

pub const DEFAULT_LOGIN_URL: &str = "https://www.healthplanet.jp/login_oauth.do";
pub const DEFAULT_DATA_URL: &str = "https://www.healthplanet.jp/innerscan.do";

/// Offset of the portal's wall clock (JST).
pub(crate) fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("valid JST offset")
}

static LOGGED_IN_MARKER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#userName").expect("valid selector"));

/// Network seam for the portal. The CLI implements this with reqwest.
pub trait PortalClient {
    /// POST the credentials and collect the session cookies.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<SessionToken, SyncError>> + Send;

    /// GET `url` with the session attached and return the raw body.
    ///
    /// Must fail with [`SyncError::Redirect`] when the final URL differs from `url`.
    fn fetch_page(
        &self,
        url: &str,
        session: &SessionToken,
    ) -> impl Future<Output = Result<Vec<u8>, SyncError>> + Send;
}

/// Where the portal lives and who to log in as.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub login_url: String,
    pub data_url: String,
    pub credentials: Credentials,
    pub retry: RetryPolicy,
}

impl PortalConfig {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            data_url: DEFAULT_DATA_URL.to_string(),
            credentials,
            retry: RetryPolicy::default(),
        }
    }

    /// Data page URL for the JST calendar day containing `date_utc`.
    #[must_use]
    pub fn day_url(&self, date_utc: DateTime<Utc>) -> String {
        let day = date_utc.with_timezone(&jst()).format("%Y%m%d");
        format!("{}?date={day}", self.data_url)
    }
}

/// Decode a portal response body. The portal always answers in Shift-JIS.
#[must_use]
pub fn decode_page(bytes: &[u8]) -> String {
    let (text, _, had_errors) = SHIFT_JIS.decode(bytes);
    if had_errors {
        debug!("page contained bytes outside Shift-JIS; replaced");
    }
    text.into_owned()
}

/// Whether the page is rendered for a logged-in user.
#[must_use]
pub fn is_logged_in(html: &str) -> bool {
    Html::parse_document(html)
        .select(&LOGGED_IN_MARKER)
        .next()
        .is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total login + fetch attempts allowed.
    pub limit: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// First state of a fetch under this policy.
    #[must_use]
    pub fn start(&self) -> FetchState {
        if self.limit == 0 {
            FetchState::Failed(SyncError::RetryExhausted { attempts: 0 })
        } else {
            FetchState::Authenticating { attempt: 1 }
        }
    }

    /// Transition taken when attempt number `attempt` showed a logged-out page.
    #[must_use]
    pub fn after_login_failure(&self, attempt: u32) -> FetchState {
        if attempt >= self.limit {
            FetchState::Failed(SyncError::RetryExhausted { attempts: attempt })
        } else {
            FetchState::Retrying { attempt }
        }
    }
}

/// A page accepted as authenticated.
#[derive(Debug, Clone)]
pub struct ValidPage {
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

/// States of one login → fetch → validate cycle. `attempt` counts from 1.
#[derive(Debug)]
pub enum FetchState {
    Authenticating { attempt: u32 },
    Fetching { attempt: u32, session: SessionToken },
    Validating { attempt: u32, html: String },
    Retrying { attempt: u32 },
    Succeeded(ValidPage),
    Failed(SyncError),
}

/// Log in, fetch `url`, and retry the whole sequence while the page shows a
/// logged-out session.
pub async fn fetch_valid_page<C: PortalClient>(
    client: &C,
    url: &str,
    credentials: &Credentials,
    policy: &RetryPolicy,
) -> Result<ValidPage, SyncError> {
    let mut state = policy.start();
    loop {
        state = match state {
            FetchState::Authenticating { attempt } => match client.login(credentials).await {
                Ok(session) => FetchState::Fetching { attempt, session },
                Err(e) => FetchState::Failed(e),
            },
            FetchState::Fetching { attempt, session } => {
                match client.fetch_page(url, &session).await {
                    Ok(bytes) => FetchState::Validating {
                        attempt,
                        html: decode_page(&bytes),
                    },
                    Err(e) => FetchState::Failed(e),
                }
            }
            FetchState::Validating { attempt, html } => {
                if is_logged_in(&html) {
                    FetchState::Succeeded(ValidPage {
                        html,
                        fetched_at: Utc::now(),
                    })
                } else {
                    warn!(url, attempt, "{}", SyncError::LoginFailed);
                    policy.after_login_failure(attempt)
                }
            }
            FetchState::Retrying { attempt } => {
                tokio::time::sleep(policy.interval).await;
                FetchState::Authenticating {
                    attempt: attempt + 1,
                }
            }
            FetchState::Succeeded(page) => return Ok(page),
            FetchState::Failed(e) => return Err(e),
        };
    }
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::TimeZone;

    use super::fake::*;
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("taro", "secret")
    }

    fn fast_policy(limit: u32) -> RetryPolicy {
        RetryPolicy {
            limit,
            interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_decode_page_shift_jis() {
        let (bytes, _, _) = SHIFT_JIS.encode("2024年03月01日 体重");
        assert_ne!(bytes.as_ref(), "2024年03月01日 体重".as_bytes());
        assert_eq!(decode_page(&bytes), "2024年03月01日 体重");
    }

    #[test]
    fn test_is_logged_in_detects_marker() {
        assert!(is_logged_in(
            "<html><body><div id=\"userName\">taro</div></body></html>"
        ));
        assert!(!is_logged_in("<html><body><div id=\"user\">taro</div></body></html>"));
        assert!(!is_logged_in(""));
    }

    #[test]
    fn test_day_url_uses_jst_date() {
        let config = PortalConfig::new(creds());
        // 16:00 UTC is already the next day in JST.
        let date = Utc.with_ymd_and_hms(2024, 2, 29, 16, 0, 0).unwrap();
        assert_eq!(
            config.day_url(date),
            "https://www.healthplanet.jp/innerscan.do?date=20240301"
        );
        let date = Utc.with_ymd_and_hms(2024, 2, 29, 14, 59, 0).unwrap();
        assert!(config.day_url(date).ends_with("date=20240229"));
    }

    #[test]
    fn test_policy_transitions() {
        let policy = fast_policy(3);
        assert!(matches!(policy.start(), FetchState::Authenticating { attempt: 1 }));
        assert!(matches!(
            policy.after_login_failure(1),
            FetchState::Retrying { attempt: 1 }
        ));
        assert!(matches!(
            policy.after_login_failure(2),
            FetchState::Retrying { attempt: 2 }
        ));
        assert!(matches!(
            policy.after_login_failure(3),
            FetchState::Failed(SyncError::RetryExhausted { attempts: 3 })
        ));
    }

    #[test]
    fn test_policy_zero_limit_fails_immediately() {
        assert!(matches!(
            fast_policy(0).start(),
            FetchState::Failed(SyncError::RetryExhausted { attempts: 0 })
        ));
    }

    #[tokio::test]
    async fn test_fetch_valid_page_first_try() {
        let portal = FakePortal::new(logged_in_page("ok"));
        let before = Utc::now();
        let page = fetch_valid_page(&portal, "http://portal/data", &creds(), &fast_policy(3))
            .await
            .unwrap();
        assert!(page.html.contains("たろう"));
        assert!(page.fetched_at >= before);
        assert_eq!(portal.login_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_valid_page_always_stale_exhausts_budget() {
        let portal = FakePortal::new(logged_out_page());
        let err = fetch_valid_page(&portal, "http://portal/data", &creds(), &fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RetryExhausted { attempts: 3 }));
        assert_eq!(portal.login_count(), 3);
        assert_eq!(portal.fetched_urls().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_valid_page_stale_once_then_valid() {
        let portal = FakePortal::new(logged_in_page("ok")).then(Ok(logged_out_page()));
        let policy = fast_policy(3);
        let started = Instant::now();
        let page = fetch_valid_page(&portal, "http://portal/data", &creds(), &policy)
            .await
            .unwrap();
        assert!(started.elapsed() >= policy.interval);
        assert!(page.html.contains("ok"));
        // Each attempt logs in again.
        assert_eq!(portal.login_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_valid_page_redirect_is_not_retried() {
        let portal = FakePortal::new(logged_in_page("ok")).then(Err(SyncError::Redirect {
            requested: "http://portal/data".to_string(),
            landed: "http://portal/login".to_string(),
        }));
        let err = fetch_valid_page(&portal, "http://portal/data", &creds(), &fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Redirect { .. }));
        assert_eq!(portal.login_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_valid_page_zero_limit_makes_no_calls() {
        let portal = FakePortal::new(logged_in_page("ok"));
        let err = fetch_valid_page(&portal, "http://portal/data", &creds(), &fast_policy(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RetryExhausted { attempts: 0 }));
        assert_eq!(portal.login_count(), 0);
    }
}
