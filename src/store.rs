//! Persistence for `Account` and `CallbackIp` records.
//!
//! The client never autosaves: the refresh protocol calls
//! `AccountStore::save_account` explicitly and treats a failure as non-fatal.
//!
//! Backends
//! - `MemoryStore`: DashMap tables, single process.
//! - `RedisStore`: JSON records in Redis, shared across instances.
//!
//! Redis keys (namespace defaults to `wxoa`):
//! - Account: `{ns}:account:{app_id}` -> JSON string
//! - Allow-list: `{ns}:callback_ip:{app_id}` -> hash (field = ip, value = JSON)

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::debug;

use crate::account::{Account, redact_id};
use crate::callback::CallbackIp;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid record: {0}")]
    Invalid(String),
}

/// Account rows, keyed by appid.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert or update by appid.
    async fn save_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn find_account(&self, app_id: &str) -> Result<Option<Account>, StoreError>;

    /// Remove the account and its callback IP allow-list.
    async fn remove_account(&self, app_id: &str) -> Result<(), StoreError>;
}

/// Callback IP allow-list rows, unique per (appid, ip).
#[async_trait]
pub trait CallbackIpStore: Send + Sync {
    async fn add_callback_ip(&self, entry: &CallbackIp) -> Result<(), StoreError>;

    async fn callback_ips(&self, app_id: &str) -> Result<Vec<CallbackIp>, StoreError>;

    async fn remove_callback_ip(&self, app_id: &str, ip: &str) -> Result<(), StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    callback_ips: DashMap<String, Vec<CallbackIp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        account.validate()?;
        self.accounts
            .insert(account.app_id.clone(), account.clone());
        Ok(())
    }

    async fn find_account(&self, app_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(app_id).map(|a| a.clone()))
    }

    async fn remove_account(&self, app_id: &str) -> Result<(), StoreError> {
        match self.accounts.entry(app_id.to_string()) {
            Entry::Occupied(owner) => {
                self.callback_ips.remove(app_id);
                owner.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(format!(
                "account {}",
                redact_id(app_id)
            ))),
        }
    }
}

#[async_trait]
impl CallbackIpStore for MemoryStore {
    async fn add_callback_ip(&self, entry: &CallbackIp) -> Result<(), StoreError> {
        entry.validate()?;
        // The account guard blocks `remove_account` until the row is in.
        let Some(_owner) = self.accounts.get(&entry.app_id) else {
            return Err(StoreError::NotFound(format!(
                "account {}",
                redact_id(&entry.app_id)
            )));
        };
        let mut list = self.callback_ips.entry(entry.app_id.clone()).or_default();
        if list.iter().any(|e| e.ip == entry.ip) {
            return Err(StoreError::Duplicate(format!("callback ip {}", entry.ip)));
        }
        list.push(entry.clone());
        Ok(())
    }

    async fn callback_ips(&self, app_id: &str) -> Result<Vec<CallbackIp>, StoreError> {
        Ok(self
            .callback_ips
            .get(app_id)
            .map(|l| l.clone())
            .unwrap_or_default())
    }

    async fn remove_callback_ip(&self, app_id: &str, ip: &str) -> Result<(), StoreError> {
        let removed = self
            .callback_ips
            .get_mut(app_id)
            .map(|mut l| {
                let before = l.len();
                l.retain(|e| e.ip != ip);
                before != l.len()
            })
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("callback ip {ip}")))
        }
    }
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            namespace: "wxoa".to_string(),
        }
    }

    /// Connect to `redis_url` and wrap the connection manager.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let cm = ConnectionManager::new(client).await?;
        Ok(Self::new(cm))
    }

    /// Override the Redis key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn account_key(&self, app_id: &str) -> String {
        account_key(&self.namespace, app_id)
    }

    fn callback_ip_key(&self, app_id: &str) -> String {
        callback_ip_key(&self.namespace, app_id)
    }
}

fn account_key(namespace: &str, app_id: &str) -> String {
    format!("{}:account:{}", namespace, app_id)
}

fn callback_ip_key(namespace: &str, app_id: &str) -> String {
    format!("{}:callback_ip:{}", namespace, app_id)
}

#[async_trait]
impl AccountStore for RedisStore {
    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        account.validate()?;
        let json = serde_json::to_string(account)?;
        let mut conn = self.redis.clone();
        let _: () = conn.set(self.account_key(&account.app_id), json).await?;
        debug!(app_id = %account.app_id_hint(), "account saved");
        Ok(())
    }

    async fn find_account(&self, app_id: &str) -> Result<Option<Account>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.account_key(app_id)).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn remove_account(&self, app_id: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.account_key(app_id))
            .del(self.callback_ip_key(app_id))
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("account {}", redact_id(app_id))));
        }
        Ok(())
    }
}

#[async_trait]
impl CallbackIpStore for RedisStore {
    async fn add_callback_ip(&self, entry: &CallbackIp) -> Result<(), StoreError> {
        entry.validate()?;
        let json = serde_json::to_string(entry)?;
        let mut conn = self.redis.clone();
        // Existence check and insert run as one script so a concurrent
        // `remove_account` cannot leave an orphaned row.
        let script = redis::Script::new(
            r#"
            if redis.call("EXISTS", KEYS[1]) == 0 then
                return -1
            end
            return redis.call("HSETNX", KEYS[2], ARGV[1], ARGV[2])
        "#,
        );
        let outcome: i64 = script
            .key(self.account_key(&entry.app_id))
            .key(self.callback_ip_key(&entry.app_id))
            .arg(&entry.ip)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        match outcome {
            -1 => Err(StoreError::NotFound(format!(
                "account {}",
                redact_id(&entry.app_id)
            ))),
            0 => Err(StoreError::Duplicate(format!("callback ip {}", entry.ip))),
            _ => Ok(()),
        }
    }

    async fn callback_ips(&self, app_id: &str) -> Result<Vec<CallbackIp>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.callback_ip_key(app_id)).await?;
        let mut out = raw
            .values()
            .map(|s| serde_json::from_str::<CallbackIp>(s))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| a.ip.cmp(&b.ip));
        Ok(out)
    }

    async fn remove_callback_ip(&self, app_id: &str, ip: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.hdel(self.callback_ip_key(app_id), ip).await?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("callback ip {ip}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_key_layout() {
        assert_eq!(account_key("wxoa", "wx1"), "wxoa:account:wx1");
        assert_eq!(callback_ip_key("ns", "wx1"), "ns:callback_ip:wx1");
    }
}
