//! Runtime settings.
//!
//! Stored as plain strings in `local_settings` under the `sync` category and
//! overridable per key with `FULFILMENT_SYNC_<KEY>` environment variables.
//! Unknown keys are ignored so older databases keep loading.

use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::{api, db, inventory, rate_limit, sheets};

/// `local_settings` category holding the sync settings.
pub const SETTINGS_CATEGORY: &str = "sync";

/// Prefix of the environment overrides.
pub const ENV_PREFIX: &str = "FULFILMENT_SYNC_";

const DEFAULT_MAX_SHEET_AGE_DAYS: u32 = 14;

pub const KEY_INVENTORY_BASE_URL: &str = "inventory_base_url";
pub const KEY_SHEETS_BASE_URL: &str = "sheets_base_url";
pub const KEY_REQUESTS_PER_SECOND: &str = "requests_per_second";
pub const KEY_QUEUE_DEPTH: &str = "queue_depth";
pub const KEY_HTTP_TIMEOUT_SECS: &str = "http_timeout_secs";
pub const KEY_PAGE_LIMIT: &str = "page_limit";
pub const KEY_MAX_SHEET_AGE_DAYS: &str = "max_sheet_age_days";

const ALL_KEYS: &[&str] = &[
    KEY_INVENTORY_BASE_URL,
    KEY_SHEETS_BASE_URL,
    KEY_REQUESTS_PER_SECOND,
    KEY_QUEUE_DEPTH,
    KEY_HTTP_TIMEOUT_SECS,
    KEY_PAGE_LIMIT,
    KEY_MAX_SHEET_AGE_DAYS,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub inventory_base_url: String,
    pub sheets_base_url: String,
    pub requests_per_second: u32,
    pub queue_depth: usize,
    pub http_timeout_secs: u64,
    pub page_limit: u32,
    /// Cached spreadsheets untouched for longer than this are dropped.
    pub max_sheet_age_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inventory_base_url: inventory::DEFAULT_BASE_URL.to_string(),
            sheets_base_url: sheets::DEFAULT_BASE_URL.to_string(),
            requests_per_second: rate_limit::DEFAULT_REQUESTS_PER_SECOND,
            queue_depth: rate_limit::DEFAULT_QUEUE_DEPTH,
            http_timeout_secs: api::DEFAULT_TIMEOUT.as_secs(),
            page_limit: inventory::DEFAULT_PAGE_LIMIT,
            max_sheet_age_days: DEFAULT_MAX_SHEET_AGE_DAYS,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| Error::Config {
        key: key.to_string(),
        message: format!("{value:?} is not a valid number ({e})"),
    })
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let parsed = parse_number::<T>(key, value)?;
    if parsed == T::default() {
        return Err(Error::Config {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(parsed)
}

fn parse_url(key: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    let foreign_scheme = trimmed.contains("://")
        && !(trimmed.starts_with("https://") || trimmed.starts_with("http://"));
    if trimmed.is_empty() || foreign_scheme {
        return Err(Error::Config {
            key: key.to_string(),
            message: format!("{value:?} is not an http(s) URL"),
        });
    }
    Ok(api::normalize_base_url(trimmed))
}

fn env_var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())
}

impl AppConfig {
    /// Load from the settings table, then apply process environment overrides.
    pub fn load(conn: &Connection) -> Result<Self> {
        Self::load_with_env(conn, |name| std::env::var(name).ok())
    }

    /// Like [`AppConfig::load`] with an injectable environment lookup.
    pub fn load_with_env(conn: &Connection, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in db::get_settings_in(conn, SETTINGS_CATEGORY)? {
            if !ALL_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring unknown sync setting");
                continue;
            }
            config.apply(&key, &value)?;
        }

        for key in ALL_KEYS {
            let name = env_var_name(key);
            if let Some(value) = env(&name).filter(|v| !v.trim().is_empty()) {
                debug!(key, env = %name, "sync setting overridden from environment");
                config.apply(key, &value)?;
            }
        }

        Ok(config)
    }

    /// Set one field from its string form.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_INVENTORY_BASE_URL => self.inventory_base_url = parse_url(key, value)?,
            KEY_SHEETS_BASE_URL => self.sheets_base_url = parse_url(key, value)?,
            KEY_REQUESTS_PER_SECOND => self.requests_per_second = parse_positive(key, value)?,
            KEY_QUEUE_DEPTH => self.queue_depth = parse_positive(key, value)?,
            KEY_HTTP_TIMEOUT_SECS => self.http_timeout_secs = parse_positive(key, value)?,
            KEY_PAGE_LIMIT => self.page_limit = parse_positive(key, value)?,
            KEY_MAX_SHEET_AGE_DAYS => self.max_sheet_age_days = parse_number(key, value)?,
            other => {
                warn!(key = other, "unknown sync setting");
                return Err(Error::Config {
                    key: other.to_string(),
                    message: "unknown setting".into(),
                });
            }
        }
        Ok(())
    }

    /// Persist every field to the settings table.
    pub fn save(&self, conn: &Connection) -> Result<()> {
        let pairs = [
            (KEY_INVENTORY_BASE_URL, self.inventory_base_url.clone()),
            (KEY_SHEETS_BASE_URL, self.sheets_base_url.clone()),
            (KEY_REQUESTS_PER_SECOND, self.requests_per_second.to_string()),
            (KEY_QUEUE_DEPTH, self.queue_depth.to_string()),
            (KEY_HTTP_TIMEOUT_SECS, self.http_timeout_secs.to_string()),
            (KEY_PAGE_LIMIT, self.page_limit.to_string()),
            (KEY_MAX_SHEET_AGE_DAYS, self.max_sheet_age_days.to_string()),
        ];
        for (key, value) in pairs {
            db::set_setting(conn, SETTINGS_CATEGORY, key, &value)?;
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn max_sheet_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.max_sheet_age_days))
    }
}
