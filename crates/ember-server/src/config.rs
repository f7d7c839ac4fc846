use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use ember_notify::ReminderConfig;

/// Secrets that ship in example files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

/// Reminder windows are 24h and 1h before start; wider tolerances would overlap.
const MAX_TOLERANCE_SECS: u64 = 11 * 3600 + 1800 - 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub push_gateway_url: Option<String>,
    pub reminders: ReminderConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("EMBER_HOST", "0.0.0.0");
        let port: u16 = var("EMBER_PORT", "3000")
            .parse()
            .context("EMBER_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        let jwt_secret = lookup("EMBER_JWT_SECRET").context("EMBER_JWT_SECRET is required")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("EMBER_JWT_SECRET is a placeholder; set a real secret");
        }

        let period: u64 = var("EMBER_REMINDER_INTERVAL_SECS", "3600")
            .parse()
            .context("EMBER_REMINDER_INTERVAL_SECS must be a number of seconds")?;
        if period == 0 {
            bail!("EMBER_REMINDER_INTERVAL_SECS must be positive");
        }
        let tolerance: u64 = var("EMBER_REMINDER_TOLERANCE_SECS", "1800")
            .parse()
            .context("EMBER_REMINDER_TOLERANCE_SECS must be a number of seconds")?;
        if tolerance == 0 || tolerance > MAX_TOLERANCE_SECS {
            bail!("EMBER_REMINDER_TOLERANCE_SECS must be between 1 and {}", MAX_TOLERANCE_SECS);
        }

        Ok(Self {
            addr,
            db_path: PathBuf::from(var("EMBER_DB_PATH", "ember.db")),
            jwt_secret,
            upload_dir: PathBuf::from(var("EMBER_UPLOAD_DIR", "./uploads")),
            push_gateway_url: lookup("EMBER_PUSH_GATEWAY_URL").filter(|url| !url.trim().is_empty()),
            reminders: ReminderConfig {
                period: Duration::from_secs(period),
                tolerance: chrono::Duration::seconds(tolerance as i64),
            },
        })
    }
}
