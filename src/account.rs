//! Official Account credential record and the capability types requests use to
//! declare "send this with an access_token".
//!
//! - `Account`: appid + appsecret plus the cached access_token and its local
//!   expiry (epoch seconds). The token fields are written only by the refresh
//!   protocol in `OfficialAccountClient`.
//! - `AccessTokenAware`: anything that can hand out a token for URL decoration.
//! - `Accountable`: what a request carries. Only the `Account` variant can be
//!   refreshed; `TokenOnly` holders are decorated but never refreshed.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{Error, Result};
use crate::store::StoreError;

/// Default query key for the token on decorated URLs.
pub const DEFAULT_ACCESS_TOKEN_KEY: &str = "access_token";

/// One WeChat Official Account integration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Display name (1..=32 chars)
    pub name: String,
    /// AppID, the stable external key (1..=64 chars)
    pub app_id: String,
    /// AppSecret (1..=120 chars)
    pub app_secret: String,
    /// Server callback Token used for URL signature verification
    #[serde(default)]
    pub token: Option<String>,
    /// 43-char EncodingAESKey for encrypted callbacks
    #[serde(default)]
    pub encoding_aes_key: Option<String>,
    /// Linked Open Platform component appid
    #[serde(default)]
    pub component_app_id: Option<String>,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    access_token: Option<String>,
    /// Epoch seconds after which the cached token is considered expired locally
    #[serde(default)]
    access_token_expire_time: Option<i64>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            ..Default::default()
        }
    }

    /// Restore a previously persisted token, e.g. when loading a record that was
    /// saved after an earlier refresh.
    pub fn with_cached_token(mut self, access_token: impl Into<String>, expire_time: i64) -> Self {
        self.store_access_token(access_token.into(), expire_time);
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn access_token_expire_time(&self) -> Option<i64> {
        self.access_token_expire_time
    }

    pub fn access_token_key_name(&self) -> &str {
        DEFAULT_ACCESS_TOKEN_KEY
    }

    /// True when no token is cached or its expiry is at/before `now`.
    pub fn is_access_token_expired(&self, now: i64) -> bool {
        match (&self.access_token, self.access_token_expire_time) {
            (Some(_), Some(expire)) => expire <= now,
            _ => true,
        }
    }

    pub(crate) fn store_access_token(&mut self, access_token: String, expire_time: i64) {
        self.access_token = Some(access_token);
        self.access_token_expire_time = Some(expire_time);
    }

    /// Redacted appid for logs.
    pub fn app_id_hint(&self) -> String {
        redact_id(&self.app_id)
    }

    /// Check column constraints before persisting.
    pub fn validate(&self) -> std::result::Result<(), StoreError> {
        check_len("name", &self.name, 1, 32)?;
        check_len("app_id", &self.app_id, 1, 64)?;
        check_len("app_secret", &self.app_secret, 1, 120)?;
        if let Some(token) = &self.token {
            check_len("token", token, 0, 128)?;
        }
        if let Some(key) = &self.encoding_aes_key {
            check_len("encoding_aes_key", key, 0, 100)?;
        }
        if let Some(id) = &self.component_app_id {
            check_len("component_app_id", id, 0, 64)?;
        }
        if let Some(at) = &self.access_token {
            check_len("access_token", at, 0, 300)?;
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> std::result::Result<(), StoreError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(StoreError::Invalid(format!(
            "{field} must be {min}..={max} characters, got {len}"
        )));
    }
    Ok(())
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.app_id)
    }
}

// Secrets stay out of Debug output.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("app_id", &self.app_id)
            .field("app_secret", &"[redacted]")
            .field("valid", &self.valid)
            .field("has_access_token", &self.access_token.is_some())
            .field("access_token_expire_time", &self.access_token_expire_time)
            .finish()
    }
}

/// A credential holder that only knows its current token.
pub trait AccessTokenAware: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn access_token_key_name(&self) -> &str {
        DEFAULT_ACCESS_TOKEN_KEY
    }
}

/// The in-memory account record shared between callers and the client.
pub type SharedAccount = Arc<RwLock<Account>>;

/// Account association declared by a request.
#[derive(Clone)]
pub enum Accountable {
    /// Full credential: can be refreshed.
    Account(SharedAccount),
    /// Token-aware only: decorated, never refreshed.
    TokenOnly(Arc<dyn AccessTokenAware>),
}

impl Accountable {
    pub fn from_account(account: Account) -> Self {
        Accountable::Account(Arc::new(RwLock::new(account)))
    }

    pub async fn access_token(&self) -> Option<String> {
        match self {
            Accountable::Account(a) => a.read().await.access_token().map(str::to_string),
            Accountable::TokenOnly(t) => t.access_token(),
        }
    }

    pub async fn access_token_key_name(&self) -> String {
        match self {
            Accountable::Account(a) => a.read().await.access_token_key_name().to_string(),
            Accountable::TokenOnly(t) => t.access_token_key_name().to_string(),
        }
    }

    /// The refreshable account, or `InvalidAccountType`.
    pub fn as_account(&self) -> Result<&SharedAccount> {
        match self {
            Accountable::Account(a) => Ok(a),
            Accountable::TokenOnly(_) => Err(Error::InvalidAccountType),
        }
    }
}

impl fmt::Debug for Accountable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accountable::Account(_) => f.write_str("Accountable::Account"),
            Accountable::TokenOnly(_) => f.write_str("Accountable::TokenOnly"),
        }
    }
}

impl From<SharedAccount> for Accountable {
    fn from(account: SharedAccount) -> Self {
        Accountable::Account(account)
    }
}

/// Redact an ID for logs: keep first 2 and last 2 chars where possible
pub fn redact_id(id: &str) -> String {
    if id.chars().count() <= 4 {
        format!("{}***", id)
    } else {
        let head: String = id.chars().take(2).collect();
        let tail: String = id.chars().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect();
        format!("{}***{}", head, tail)
    }
}

/// Get current epoch seconds
pub(crate) fn epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
