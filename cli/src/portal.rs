use std::time::Duration;

use anyhow::anyhow;
use reqwest::Url;
use reqwest::header::{COOKIE, SET_COOKIE};
use tracing::debug;

use innerscan_core::SyncError;
use innerscan_core::portal::PortalClient;
use innerscan_core::session::{Credentials, SessionToken};

/// reqwest-backed access to the Health Planet portal.
pub struct HealthPlanetClient {
    client: reqwest::Client,
    login_url: String,
}

impl HealthPlanetClient {
    pub fn new(login_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "innerscan/{} (body composition sync)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!(e).context("Failed to build HTTP client"))?;
        Ok(Self {
            client,
            login_url: login_url.into(),
        })
    }
}

/// Whether the response landed on the requested URL, ignoring spelling
/// differences such as letter case or an explicit default port.
fn landed_on(requested: &str, landed: &Url) -> bool {
    Url::parse(requested).is_ok_and(|requested| &requested == landed)
}

fn transport(err: reqwest::Error, what: &str) -> SyncError {
    SyncError::Transport(anyhow!(err).context(format!("Failed to reach portal ({what})")))
}

impl PortalClient for HealthPlanetClient {
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, SyncError> {
        let resp = self
            .client
            .post(&self.login_url)
            .form(&credentials.login_form())
            .send()
            .await
            .map_err(|e| transport(e, "login"))?;

        if !resp.status().is_success() {
            return Err(SyncError::Auth {
                status: resp.status().as_u16(),
            });
        }

        let cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok());
        let token = SessionToken::from_set_cookie_headers(cookies);
        debug!(
            has_session = !token.jsessionid.is_empty(),
            "login response received"
        );
        Ok(token)
    }

    async fn fetch_page(&self, url: &str, session: &SessionToken) -> Result<Vec<u8>, SyncError> {
        let resp = self
            .client
            .get(url)
            .header(COOKIE, session.cookie_header())
            .send()
            .await
            .map_err(|e| transport(e, "data page"))?;

        if !resp.status().is_success() {
            return Err(SyncError::Fetch {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        if !landed_on(url, resp.url()) {
            return Err(SyncError::Redirect {
                requested: url.to_string(),
                landed: resp.url().to_string(),
            });
        }

        let body = resp.bytes().await.map_err(|e| transport(e, "data page body"))?;
        Ok(body.to_vec())
    }
}
