//! Official Account access_token requests.
//!
//! Endpoints:
//! - Standard: GET https://api.weixin.qq.com/cgi-bin/token?grant_type=client_credential&appid=APPID&secret=APPSECRET
//!   Repeated calls inside the validity window return the same token.
//! - Stable: POST https://api.weixin.qq.com/cgi-bin/stable_token
//!   body `{"grant_type","appid","secret","force_refresh"}`; `force_refresh=true`
//!   invalidates the previous token and issues a new one.
//!
//! Both are bare requests (no account association), so a failure while fetching
//! a token never triggers another refresh.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::account::Account;
use crate::errors::{Error, Result};
use crate::request::{ApiRequest, RequestOptions};

pub const TOKEN_PATH: &str = "/cgi-bin/token";
pub const STABLE_TOKEN_PATH: &str = "/cgi-bin/stable_token";
const GRANT_TYPE: &str = "client_credential";

/// Successful access_token response
#[derive(Clone, Debug, Deserialize)]
pub struct AccessToken {
    /// Access token string
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
}

impl AccessToken {
    /// Reject payloads that decode but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_empty() {
            return Err(Error::DataFormat {
                error: "access_token is empty".to_string(),
                body: String::new(),
            });
        }
        if self.expires_in <= 0 {
            return Err(Error::DataFormat {
                error: format!("expires_in must be positive, got {}", self.expires_in),
                body: String::new(),
            });
        }
        Ok(())
    }
}

/// GET /cgi-bin/token
#[derive(Clone)]
pub struct GetTokenRequest {
    app_id: String,
    secret: String,
}

impl GetTokenRequest {
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            secret: secret.into(),
        }
    }

    pub fn for_account(account: &Account) -> Self {
        Self::new(account.app_id.clone(), account.app_secret.clone())
    }
}

impl ApiRequest for GetTokenRequest {
    type Response = AccessToken;

    fn request_path(&self) -> String {
        TOKEN_PATH.to_string()
    }

    fn request_method(&self) -> Method {
        Method::GET
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions::default()
            .query("grant_type", GRANT_TYPE)
            .query("appid", self.app_id.clone())
            .query("secret", self.secret.clone())
    }
}

/// POST /cgi-bin/stable_token
#[derive(Clone)]
pub struct GetStableTokenRequest {
    app_id: String,
    secret: String,
    force_refresh: bool,
}

impl GetStableTokenRequest {
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>, force_refresh: bool) -> Self {
        Self {
            app_id: app_id.into(),
            secret: secret.into(),
            force_refresh,
        }
    }

    pub fn for_account(account: &Account, force_refresh: bool) -> Self {
        Self::new(
            account.app_id.clone(),
            account.app_secret.clone(),
            force_refresh,
        )
    }

    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }
}

impl ApiRequest for GetStableTokenRequest {
    type Response = AccessToken;

    fn request_path(&self) -> String {
        STABLE_TOKEN_PATH.to_string()
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions::default().json(json!({
            "grant_type": GRANT_TYPE,
            "appid": self.app_id,
            "secret": self.secret,
            "force_refresh": self.force_refresh,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_request_uses_query() {
        let account = Account::new("demo", "wxAPP", "SECRET");
        let req = GetTokenRequest::for_account(&account);
        assert_eq!(req.request_method(), Method::GET);
        assert_eq!(req.request_path(), "/cgi-bin/token");
        let opts = req.request_options();
        assert_eq!(
            opts.query,
            vec![
                ("grant_type".to_string(), "client_credential".to_string()),
                ("appid".to_string(), "wxAPP".to_string()),
                ("secret".to_string(), "SECRET".to_string()),
            ]
        );
        assert!(opts.json.is_none());
        assert!(req.account().is_none());
    }

    #[test]
    fn stable_request_uses_json_body() {
        let account = Account::new("demo", "wxAPP", "SECRET");
        let req = GetStableTokenRequest::for_account(&account, true);
        assert_eq!(req.request_method(), Method::POST);
        assert_eq!(req.request_path(), "/cgi-bin/stable_token");
        let opts = req.request_options();
        assert!(opts.query.is_empty());
        assert_eq!(
            opts.json,
            Some(json!({
                "grant_type": "client_credential",
                "appid": "wxAPP",
                "secret": "SECRET",
                "force_refresh": true,
            }))
        );
        assert!(req.force_refresh());
        assert!(!GetStableTokenRequest::for_account(&account, false).force_refresh());
    }

    #[test]
    fn empty_token_is_rejected() {
        let t = AccessToken {
            access_token: String::new(),
            expires_in: 7200,
        };
        assert!(matches!(t.validate(), Err(Error::DataFormat { .. })));
    }

    #[test]
    fn non_positive_lifetime_is_rejected() {
        for expires_in in [0, -7200] {
            let t = AccessToken {
                access_token: "T".to_string(),
                expires_in,
            };
            assert!(matches!(t.validate(), Err(Error::DataFormat { .. })));
        }
    }
}
