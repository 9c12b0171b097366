/*!
Example: fetch an Official Account access_token and call an account-bound API

Run:
  WX_APPID=wx... \
  WX_APPSECRET=your_appsecret \
  cargo run --example get_token

Optional:
  WXOA_API_BASE, WXOA_TIMEOUT_SECS (see `ClientConfig::from_env`)
  WX_STABLE=1 to use /cgi-bin/stable_token instead of /cgi-bin/token
*/

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use wxoa_rs::request::AccountApiRequest;
use wxoa_rs::{Account, AccountStore, Accountable, ClientConfig, MemoryStore, OfficialAccountClient};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber")?;

    let _ = dotenv();

    let appid = env::var("WX_APPID").context("set WX_APPID (Official Account AppID, starts with 'wx')")?;
    let secret = env::var("WX_APPSECRET").context("set WX_APPSECRET")?;
    if appid.starts_with("ww") {
        eprintln!(
            "hint: appid starts with 'ww', which is usually a WeCom corpid; Official Account APIs need the AppID from the MP console"
        );
    }

    let store = Arc::new(MemoryStore::new());
    let record = Account::new("demo", appid, secret);
    store.save_account(&record).await?;

    let client = OfficialAccountClient::new(ClientConfig::from_env()?, store.clone())?;
    let account = Accountable::from_account(record);

    if env::var("WX_STABLE").is_ok() {
        client
            .refresh_stable_access_token(&account, false)
            .await
            .context("stable_token request failed")?;
    } else {
        client
            .refresh_access_token(&account)
            .await
            .context("token request failed (check AppID/AppSecret and the API IP whitelist)")?;
    }

    if let Accountable::Account(shared) = &account {
        let a = shared.read().await;
        info!(
            app_id = %a.app_id_hint(),
            token_len = a.access_token().map(str::len).unwrap_or(0),
            expire_time = ?a.access_token_expire_time(),
            "access_token ready"
        );
    }

    // Any account-bound call now carries the cached token; an expired token is
    // refreshed and the call retried once.
    let domains = client
        .execute(&AccountApiRequest::get(account, "/cgi-bin/get_api_domain_ip"))
        .await
        .context("get_api_domain_ip failed")?;
    println!("api domain ips: {domains}");

    Ok(())
}
