//! Client configuration.
//!
//! Environment variables (a `.env` file is loaded when present):
//! - WXOA_API_BASE: upstream base URL (default: https://api.weixin.qq.com)
//! - WXOA_TIMEOUT_SECS: per-request timeout (default: 10)
//! - WXOA_EXPIRY_MARGIN_SECS: subtracted from `expires_in` (default: 10)
//! - WXOA_REFRESH_WHEN_EXPIRED: refresh before sending when the cached token is
//!   missing or past its expiry (default: true)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::errors::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 10;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base: String,
    pub timeout: Duration,
    pub expiry_margin_secs: i64,
    pub refresh_when_expired: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS,
            refresh_when_expired: true,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        let mut cfg = Self::default();
        if let Ok(base) = env::var("WXOA_API_BASE") {
            cfg.api_base = base;
        }
        if let Some(secs) = parse_var::<u64>("WXOA_TIMEOUT_SECS")? {
            cfg.timeout = Duration::from_secs(secs);
        }
        if let Some(margin) = parse_var::<i64>("WXOA_EXPIRY_MARGIN_SECS")? {
            cfg.expiry_margin_secs = margin;
        }
        if let Some(flag) = parse_var::<bool>("WXOA_REFRESH_WHEN_EXPIRED")? {
            cfg.refresh_when_expired = flag;
        }
        Ok(cfg)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_refresh_when_expired(mut self, enabled: bool) -> Self {
        self.refresh_when_expired = enabled;
        self
    }

    /// Absolute URL for a request path.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.api_base.trim_end_matches('/'), path)
        } else {
            path.to_string()
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}
