use anyhow::{Context, Result};
use clap::Args;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

use innerscan_core::portal::{DEFAULT_DATA_URL, DEFAULT_LOGIN_URL, PortalConfig, RetryPolicy};
use innerscan_core::session::Credentials;

pub struct Config {
    pub db_path: PathBuf,
}

impl Config {
    /// Resolve the database location, creating its directory if needed.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_override {
            Some(path) => path,
            None => {
                let proj_dirs = ProjectDirs::from("", "", "innerscan")
                    .context("Could not determine home directory")?;
                proj_dirs.data_dir().join("innerscan.db")
            }
        };

        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        }

        Ok(Config { db_path })
    }
}

/// Portal account and endpoint settings shared by every network command.
#[derive(Args, Clone)]
pub struct PortalArgs {
    /// Health Planet login ID
    #[arg(long, global = true, env = "INNERSCAN_USERNAME")]
    pub username: Option<String>,
    /// Health Planet password
    #[arg(long, global = true, env = "INNERSCAN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Login form URL
    #[arg(long, global = true, env = "INNERSCAN_LOGIN_URL", default_value = DEFAULT_LOGIN_URL)]
    pub login_url: String,
    /// Measurement page URL (the `date` query is appended)
    #[arg(long, global = true, env = "INNERSCAN_DATA_URL", default_value = DEFAULT_DATA_URL)]
    pub data_url: String,
    /// Attempts per page before giving up on a stale session
    #[arg(long, global = true, default_value = "3")]
    pub retry_limit: u32,
    /// Seconds to wait between attempts
    #[arg(long, global = true, default_value = "1")]
    pub retry_interval: u64,
}

impl PortalArgs {
    pub fn portal_config(&self) -> Result<PortalConfig> {
        let username = self
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .context("Missing login ID. Pass --username or set INNERSCAN_USERNAME")?;
        let password = self
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .context("Missing password. Pass --password or set INNERSCAN_PASSWORD")?;

        Ok(PortalConfig {
            login_url: self.login_url.clone(),
            data_url: self.data_url.clone(),
            credentials: Credentials::new(username, password),
            retry: RetryPolicy {
                limit: self.retry_limit,
                interval: Duration::from_secs(self.retry_interval),
            },
        })
    }
}
