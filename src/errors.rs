//! Crate error type and WeChat Official Account errcode helpers.
//!
//! Purpose
//! - One `Error` enum for everything `OfficialAccountClient` can surface
//! - Map well-known global errcode values to categories and hints
//! - Decide whether an upstream error means "refresh the access_token"
//!
//! Notes
//! - `errmsg` may change; treat it as diagnostic text. The only message text the
//!   client keys off is the `access_token expired` prefix, and it also accepts the
//!   dedicated errcodes for that condition.
//! - Unknown codes are categorized as `Unknown`: no token refresh, generic hint.

use thiserror::Error;

use crate::store::StoreError;

/// Message prefix the upstream uses when a cached access_token has expired.
pub const TOKEN_EXPIRED_PREFIX: &str = "access_token expired";

/// Unified error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Raised by custom `Transport` implementations.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("weixin error {code}: {message}")]
    Wx { code: i64, message: String },

    #[error("unexpected response format: {error}; body: {body}")]
    DataFormat { error: String, body: String },

    #[error("only full accounts (appid + appsecret) can refresh access_token")]
    InvalidAccountType,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the upstream rejected the request because the cached
    /// access_token is no longer valid.
    pub fn is_token_expired(&self) -> bool {
        match self {
            Error::Wx { code, message } => {
                message.starts_with(TOKEN_EXPIRED_PREFIX) || should_refresh_token(*code)
            }
            _ => false,
        }
    }

    /// Upstream errcode, if this is a business error.
    pub fn errcode(&self) -> Option<i64> {
        match self {
            Error::Wx { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Friendly hint for business errors.
    pub fn hint(&self) -> Option<&'static str> {
        self.errcode().map(hint_for)
    }
}

/// High-level classification for an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// errcode = 0
    Success,
    /// System busy; retry later
    TemporarySystem,
    /// Credential, token or whitelist problems
    Auth,
    /// Missing or malformed parameters
    InvalidParam,
    /// Call frequency or quota exceeded
    Limit,
    /// The account lacks permission for the API
    Unsupported,
    Unknown,
}

/// Classify errcode into a category.
pub fn category_for(code: i64) -> ErrorCategory {
    match code {
        0 => ErrorCategory::Success,
        -1 => ErrorCategory::TemporarySystem,
        40001 | 40013 | 40014 | 40125 | 40164 | 41001 | 41002 | 41004 | 42001 | 89503 => {
            ErrorCategory::Auth
        }
        40002 | 40003 | 43002 | 44002 | 47001 => ErrorCategory::InvalidParam,
        45009 | 45011 | 45047 => ErrorCategory::Limit,
        48001 | 50001 | 50002 => ErrorCategory::Unsupported,
        _ => ErrorCategory::Unknown,
    }
}

/// Returns a friendly hint for a known errcode.
pub fn hint_for(code: i64) -> &'static str {
    match code {
        -1 => "System busy; retry after a short delay.",
        0 => "Success.",
        40001 => {
            "Invalid credential: appsecret is wrong or the access_token is invalid; verify the AppSecret and that no other service refreshed the token."
        }
        40002 => "Invalid grant_type; use client_credential.",
        40003 => "Invalid openid; ensure the user follows this Official Account.",
        40013 => "Invalid appid; verify the AppID (starts with 'wx').",
        40014 => "Invalid access_token; refresh the token and retry.",
        40125 => "Invalid appsecret; reset or re-copy the AppSecret.",
        40164 => {
            "Caller IP is not on the API IP whitelist; add it in the Official Account developer settings."
        }
        41001 => "access_token missing; the request was not decorated with a token.",
        41002 => "appid missing.",
        41004 => "appsecret missing.",
        42001 => "access_token expired; refresh the token and retry.",
        43002 => "This API requires a POST request.",
        44002 => "POST body is empty.",
        45009 => "Daily API quota reached; check quota or clear it in the console.",
        45011 => "API called too frequently; slow down.",
        45047 => "Customer service message limit exceeded.",
        47001 => "Malformed JSON/XML request body.",
        48001 => "API unauthorized; the account lacks permission for this API.",
        50001 => "User has not authorized this API.",
        50002 => "User is restricted.",
        89503 => "Caller IP requires administrator confirmation.",
        _ => "Unknown code; refer to official docs and logs for details.",
    }
}

/// Whether the access_token must be reacquired for this code.
pub fn should_refresh_token(code: i64) -> bool {
    matches!(code, 40014 | 42001)
}

/// Return true if this error looks temporary.
pub fn is_temporary(code: i64) -> bool {
    matches!(category_for(code), ErrorCategory::TemporarySystem)
}

/// Return true if this looks like an auth/token problem.
pub fn is_auth_issue(code: i64) -> bool {
    matches!(category_for(code), ErrorCategory::Auth)
}

/// Produce a concise, human-readable explanation string.
pub fn explain(errcode: i64, errmsg: &str) -> String {
    let mut parts = vec![
        format!("errcode={} ({:?})", errcode, category_for(errcode)),
        format!("errmsg: {}", errmsg),
        format!("hint: {}", hint_for(errcode)),
    ];
    if should_refresh_token(errcode) || errmsg.starts_with(TOKEN_EXPIRED_PREFIX) {
        parts.push("refresh_token: yes".to_string());
    } else {
        parts.push("refresh_token: no".to_string());
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wx(code: i64, message: &str) -> Error {
        Error::Wx {
            code,
            message: message.to_string(),
        }
    }

    #[test]
    fn expiry_signal_by_message_prefix() {
        assert!(wx(99999, "access_token expired: hint [abc]").is_token_expired());
        assert!(!wx(99999, "the access_token expired").is_token_expired());
    }

    #[test]
    fn expiry_signal_by_code() {
        assert!(wx(42001, "whatever").is_token_expired());
        assert!(wx(40014, "invalid access_token").is_token_expired());
        assert!(!wx(40001, "invalid credential").is_token_expired());
    }

    #[test]
    fn non_business_errors_never_signal_expiry() {
        assert!(!Error::Transport("access_token expired".into()).is_token_expired());
        assert!(!Error::InvalidAccountType.is_token_expired());
    }

    #[test]
    fn explain_mentions_refresh_advice() {
        let s = explain(42001, "access_token expired");
        assert!(s.contains("Auth"));
        assert!(s.contains("refresh_token: yes"));
        assert!(explain(45009, "reach max api daily quota limit").contains("refresh_token: no"));
    }

    #[test]
    fn hint_is_exposed_for_business_errors() {
        assert_eq!(wx(40164, "invalid ip").hint(), Some(hint_for(40164)));
        assert_eq!(Error::Config("x".into()).hint(), None);
    }
}
