#![doc = r#"
wxoa-rs

WeChat Official Account API client with managed access_token lifecycle.

The client caches a token on each `Account`, appends it to account-bound
requests, and when the upstream reports the token expired it refreshes once
and retries the call once. Refreshed tokens are written back through an
explicit `AccountStore`.

Modules:
- account: `Account` record and the `Accountable` capability requests carry
- token: standard and stable access_token requests
- request: `ApiRequest` trait and generic account-bound requests
- envelope: `errcode`/`errmsg` envelope decoding
- client: `OfficialAccountClient` (execute, refresh, retry)
- store: `AccountStore`/`CallbackIpStore` with in-memory and Redis backends
- callback: callback IP allow-list and server URL signature checks
- errors: `Error` type and errcode helpers

Quick usage:

```ignore
use std::sync::Arc;
use wxoa_rs::{
    Account, AccountStore, Accountable, ClientConfig, MemoryStore, OfficialAccountClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let client = OfficialAccountClient::new(ClientConfig::default(), store.clone())?;

    let record = Account::new("demo", "your_appid", "your_appsecret");
    store.save_account(&record).await?;
    let account = Accountable::from_account(record);
    client.refresh_access_token(&account).await?;

    let added = client.sync_callback_ips(&account, store.as_ref()).await?;
    println!("callback ips added: {added}");
    Ok(())
}
```
"#]

pub mod account;
pub mod callback;
pub mod client;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod request;
pub mod store;
pub mod token;
pub mod transport;

pub use account::{AccessTokenAware, Account, Accountable, SharedAccount};
pub use callback::CallbackIp;
pub use client::OfficialAccountClient;
pub use config::ClientConfig;
pub use errors::{Error, Result};
pub use request::{ApiRequest, RequestOptions};
pub use store::{AccountStore, CallbackIpStore, MemoryStore, RedisStore, StoreError};
pub use token::{AccessToken, GetStableTokenRequest, GetTokenRequest};
