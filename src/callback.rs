//! Server callback helpers for an Official Account
//!
//! Features:
//! - `CallbackIp`: allow-listed source IPs for inbound callbacks, one list per account
//! - `is_callback_ip_allowed`: check a peer address against the stored allow-list
//! - Server URL verification: SHA1 over the sorted (token, timestamp, nonce)
//!
//! The allow-list can be filled from the upstream `getcallbackip` API with
//! `OfficialAccountClient::sync_callback_ips`.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::account::Account;
use crate::store::{CallbackIpStore, StoreError};

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("account has no callback token configured")]
    MissingToken,
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// One allow-listed callback source IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackIp {
    /// Owning account's appid
    pub app_id: String,
    pub ip: String,
    #[serde(default)]
    pub remark: Option<String>,
}

impl CallbackIp {
    /// Build a validated entry.
    pub fn new(
        app_id: impl Into<String>,
        ip: impl Into<String>,
        remark: Option<String>,
    ) -> Result<Self, StoreError> {
        let entry = Self {
            app_id: app_id.into(),
            ip: ip.into(),
            remark,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.ip.is_empty() || self.ip.len() > 45 || self.ip.parse::<IpAddr>().is_err() {
            return Err(StoreError::Invalid(format!("invalid ip address: {:?}", self.ip)));
        }
        if let Some(remark) = &self.remark {
            if remark.chars().count() > 100 {
                return Err(StoreError::Invalid("remark exceeds 100 characters".into()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for CallbackIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ip)
    }
}

/// True when the account has no allow-list configured, or `ip` is on it.
pub async fn is_callback_ip_allowed(
    store: &dyn CallbackIpStore,
    app_id: &str,
    ip: IpAddr,
) -> Result<bool, StoreError> {
    let entries = store.callback_ips(app_id).await?;
    if entries.is_empty() {
        return Ok(true);
    }
    Ok(entries
        .iter()
        .filter_map(|e| e.ip.parse::<IpAddr>().ok())
        .any(|allowed| allowed == ip))
}

/// Compute SHA1 signature by sorting parts lexicographically and concatenating.
pub fn sha1_signature(parts: &[&str]) -> String {
    let mut v = parts.to_vec();
    v.sort_unstable();
    let mut hasher = Sha1::new();
    for p in v {
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();
    // lowercase hex
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        use core::fmt::Write;
        let _ = write!(&mut s, "{:02x}", b);
    }
    s
}

/// Verify URL signature (plain mode, no encrypt parameter).
pub fn verify_url_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    let calc = sha1_signature(&[token, timestamp, nonce]);
    calc.eq_ignore_ascii_case(signature)
}

/// Server URL verification for `account`: returns `echostr` if the signature
/// matches the account's callback token.
pub fn verify_server_url(
    account: &Account,
    timestamp: &str,
    nonce: &str,
    signature: &str,
    echostr: &str,
) -> Result<String, CallbackError> {
    let token = account
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(CallbackError::MissingToken)?;
    if verify_url_signature(token, timestamp, nonce, signature) {
        Ok(echostr.to_string())
    } else {
        Err(CallbackError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountStore, MemoryStore};

    #[test]
    fn callback_ip_validation() {
        assert!(CallbackIp::new("wx1", "101.226.103.0", None).is_ok());
        assert!(CallbackIp::new("wx1", "240e:e1:a900:50::", Some("v6".into())).is_ok());
        assert!(CallbackIp::new("wx1", "not-an-ip", None).is_err());
        assert!(CallbackIp::new("wx1", "", None).is_err());
        assert!(CallbackIp::new("wx1", "1.1.1.1", Some("r".repeat(101))).is_err());
        assert_eq!(
            CallbackIp::new("wx1", "1.2.3.4", None).unwrap().to_string(),
            "1.2.3.4"
        );
    }

    #[test]
    fn signature_is_order_independent() {
        let a = sha1_signature(&["token", "1700000000", "nonce"]);
        let b = sha1_signature(&["nonce", "token", "1700000000"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(verify_url_signature("token", "1700000000", "nonce", &a.to_uppercase()));
    }

    #[test]
    fn server_url_verification() {
        let mut account = Account::new("demo", "wx1", "s");
        assert!(matches!(
            verify_server_url(&account, "1", "2", "sig", "echo"),
            Err(CallbackError::MissingToken)
        ));

        account.token = Some("cbtoken".into());
        let sig = sha1_signature(&["cbtoken", "1", "2"]);
        assert_eq!(verify_server_url(&account, "1", "2", &sig, "echo").unwrap(), "echo");
        assert!(matches!(
            verify_server_url(&account, "1", "3", &sig, "echo"),
            Err(CallbackError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn allow_list_check() {
        let store = MemoryStore::new();
        store
            .save_account(&Account::new("demo", "wx1", "s"))
            .await
            .unwrap();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        // not configured: everything passes
        assert!(is_callback_ip_allowed(&store, "wx1", peer).await.unwrap());

        store
            .add_callback_ip(&CallbackIp::new("wx1", "10.0.0.2", None).unwrap())
            .await
            .unwrap();
        assert!(!is_callback_ip_allowed(&store, "wx1", peer).await.unwrap());

        store
            .add_callback_ip(&CallbackIp::new("wx1", "10.0.0.1", None).unwrap())
            .await
            .unwrap();
        assert!(is_callback_ip_allowed(&store, "wx1", peer).await.unwrap());
    }
}
