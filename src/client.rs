//! Official Account API client with managed access_token refresh.
//!
//! Flow for `execute(request)`:
//! 1. If the request carries a full `Account` whose token is missing or past its
//!    local expiry, refresh first (when `refresh_when_expired` is on).
//! 2. Resolve the path, append `?access_token=...` (or `&...`) for account-bound
//!    requests, send through the `Transport`, decode the envelope.
//! 3. If the upstream reports an expired/invalid access_token and the request is
//!    account-bound: refresh once, resend once. Whatever the second attempt
//!    returns is final.
//!
//! Refresh protocol (`refresh_access_token`):
//! - token-only holders fail with `InvalidAccountType`
//! - GET /cgi-bin/token with the account's appid/appsecret (a bare request, so
//!   a failure here never recurses into another refresh)
//! - expiry = now + expires_in - margin (10s by default); a non-positive or
//!   overflowing lifetime is `DataFormat`
//! - the in-memory account is updated first, then saved; a save failure is
//!   logged and swallowed
//!
//! Refreshes are serialized per appid. A task that hit the expiry signal skips
//! the upstream call if, once it holds the lock, the account already carries a
//! different token than the one it sent.
//!
//! Example:
//! ```ignore
//! use std::sync::Arc;
//! use wxoa_rs::{Account, Accountable, ClientConfig, MemoryStore, OfficialAccountClient};
//! use wxoa_rs::request::AccountApiRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let client = OfficialAccountClient::new(ClientConfig::from_env()?, store)?;
//!     let account = Accountable::from_account(Account::new("demo", "wx...", "secret"));
//!
//!     let ips = client
//!         .execute(&AccountApiRequest::get(account, "/cgi-bin/get_api_domain_ip"))
//!         .await?;
//!     println!("{ips}");
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::account::{Accountable, SharedAccount, epoch};
use crate::callback::CallbackIp;
use crate::config::ClientConfig;
use crate::envelope;
use crate::errors::{Error, Result};
use crate::request::{ApiRequest, GetCallbackIpRequest};
use crate::store::{AccountStore, CallbackIpStore};
use crate::token::{AccessToken, GetStableTokenRequest, GetTokenRequest};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

/// Remark stored on allow-list entries created by `sync_callback_ips`.
pub const SYNCED_REMARK: &str = "synced from getcallbackip";

#[derive(Clone)]
pub struct OfficialAccountClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn AccountStore>,
    config: ClientConfig,
    refresh_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl OfficialAccountClient {
    /// Client over `reqwest` with the configured timeout.
    pub fn new(config: ClientConfig, store: Arc<dyn AccountStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport), store))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request`, refreshing the account's token and retrying at most once
    /// when the upstream reports it expired.
    #[instrument(level = "debug", skip_all, fields(path = %request.request_path()))]
    pub async fn execute<R: ApiRequest>(&self, request: &R) -> Result<R::Response> {
        let account = request.account();

        if self.config.refresh_when_expired {
            if let Some(Accountable::Account(shared)) = account {
                let (expired, cached) = {
                    let a = shared.read().await;
                    (
                        a.is_access_token_expired(epoch()),
                        a.access_token().map(str::to_string),
                    )
                };
                if expired {
                    debug!("cached access_token missing or expired; refreshing before send");
                    self.refresh_if_unchanged(shared, cached).await?;
                }
            }
        }

        let sent_token = current_token(account).await;

        match self.dispatch(request, sent_token.as_deref()).await {
            Err(e) if e.is_token_expired() => {
                let Some(account) = account else {
                    return Err(e);
                };
                warn!(error = %e, "access_token rejected upstream; refreshing and retrying once");
                let shared = account.as_account()?;
                self.refresh_if_unchanged(shared, sent_token).await?;
                let retry_token = current_token(Some(account)).await;
                self.dispatch(request, retry_token.as_deref()).await
            }
            other => other,
        }
    }

    /// Fetch a new token for `account` via GET /cgi-bin/token and store it.
    #[instrument(level = "debug", skip_all)]
    pub async fn refresh_access_token(&self, account: &Accountable) -> Result<()> {
        let shared = account.as_account()?;
        let lock = self.refresh_lock(shared).await;
        let _guard = lock.lock().await;
        let request = GetTokenRequest::for_account(&*shared.read().await);
        self.fetch_and_store(shared, request).await
    }

    /// Like `refresh_access_token` but through POST /cgi-bin/stable_token.
    /// With `force_refresh` the upstream invalidates the previous token.
    #[instrument(level = "debug", skip(self, account))]
    pub async fn refresh_stable_access_token(
        &self,
        account: &Accountable,
        force_refresh: bool,
    ) -> Result<()> {
        let shared = account.as_account()?;
        let lock = self.refresh_lock(shared).await;
        let _guard = lock.lock().await;
        let request = GetStableTokenRequest::for_account(&*shared.read().await, force_refresh);
        self.fetch_and_store(shared, request).await
    }

    /// Pull WeChat's callback IP list and add entries missing from the
    /// account's allow-list. Returns how many were added.
    #[instrument(level = "debug", skip_all)]
    pub async fn sync_callback_ips(
        &self,
        account: &Accountable,
        store: &dyn CallbackIpStore,
    ) -> Result<usize> {
        let app_id = account.as_account()?.read().await.app_id.clone();
        let list = self
            .execute(&GetCallbackIpRequest::new(account.clone()))
            .await?;

        let mut known: HashSet<String> = store
            .callback_ips(&app_id)
            .await?
            .into_iter()
            .map(|e| e.ip)
            .collect();

        let mut added = 0;
        for ip in &list.ip_list {
            if known.contains(ip) {
                continue;
            }
            match CallbackIp::new(app_id.clone(), ip.clone(), Some(SYNCED_REMARK.to_string())) {
                Ok(entry) => {
                    store.add_callback_ip(&entry).await?;
                    known.insert(entry.ip);
                    added += 1;
                }
                Err(e) => warn!(%ip, error = %e, "skipping callback ip"),
            }
        }
        debug!(added, total = list.ip_list.len(), "callback ips synced");
        Ok(added)
    }

    /// One attempt: decorate with `token`, send, decode. Never refreshes.
    async fn dispatch<R: ApiRequest>(
        &self,
        request: &R,
        token: Option<&str>,
    ) -> Result<R::Response> {
        let mut url = self.config.resolve(&request.request_path());
        if let Some(account) = request.account() {
            let key = account.access_token_key_name().await;
            url = decorate_url(&url, &key, token.unwrap_or_default());
        }
        let options = request.request_options();
        let method = request.request_method();
        debug!(%method, "sending request");

        let resp = self
            .transport
            .send(HttpRequest {
                method,
                url,
                query: options.query,
                json: options.json,
            })
            .await?;
        envelope::decode_as::<R::Response>(&resp.body)
    }

    /// Refresh unless another task already replaced `seen` while we waited.
    async fn refresh_if_unchanged(
        &self,
        shared: &SharedAccount,
        seen: Option<String>,
    ) -> Result<()> {
        let lock = self.refresh_lock(shared).await;
        let _guard = lock.lock().await;

        let request = {
            let a = shared.read().await;
            let current = a.access_token().map(str::to_string);
            if current.is_some() && current != seen && !a.is_access_token_expired(epoch()) {
                debug!(app_id = %a.app_id_hint(), "access_token already refreshed by another task");
                return Ok(());
            }
            GetTokenRequest::for_account(&a)
        };
        self.fetch_and_store(shared, request).await
    }

    async fn fetch_and_store<R>(&self, shared: &SharedAccount, request: R) -> Result<()>
    where
        R: ApiRequest<Response = AccessToken>,
    {
        let token = self.dispatch(&request, None).await?;
        token.validate()?;
        let expire_time = epoch()
            .checked_add(token.expires_in)
            .and_then(|t| t.checked_sub(self.config.expiry_margin_secs))
            .ok_or_else(|| Error::DataFormat {
                error: format!("expires_in out of range: {}", token.expires_in),
                body: String::new(),
            })?;

        let snapshot = {
            let mut a = shared.write().await;
            a.store_access_token(token.access_token, expire_time);
            a.clone()
        };
        debug!(app_id = %snapshot.app_id_hint(), expire_time, "access_token refreshed");

        if let Err(e) = self.store.save_account(&snapshot).await {
            error!(
                app_id = %snapshot.app_id_hint(),
                error = %e,
                "failed to persist refreshed access_token"
            );
        }
        Ok(())
    }

    async fn refresh_lock(&self, shared: &SharedAccount) -> Arc<Mutex<()>> {
        let key = shared.read().await.app_id.clone();
        self.refresh_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

async fn current_token(account: Option<&Accountable>) -> Option<String> {
    match account {
        Some(a) => a.access_token().await,
        None => None,
    }
}

/// Append `key=token` to `path`, using `&` when it already has a query.
pub fn decorate_url(path: &str, key: &str, token: &str) -> String {
    if path.contains('?') {
        format!("{path}&{key}={token}")
    } else {
        format!("{path}?{key}={token}")
    }
}
