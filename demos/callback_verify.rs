/*!
Example: Official Account server URL verification behind a callback IP allow-list

Run:
  WX_APPID=wx... \
  WX_APPSECRET=your_appsecret \
  WX_TOKEN=your_callback_token \
  WX_CALLBACK_IPS=127.0.0.1,101.226.62.77 \
  cargo run --example callback_verify

Then configure `http://your-host:3000/wechat/callback` as the server URL.
WeChat sends GET ?signature=..&timestamp=..&nonce=..&echostr=..; the handler
returns echostr when the peer IP is allowed and the signature matches.
*/

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use dotenvy::dotenv;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;
use wxoa_rs::callback::{is_callback_ip_allowed, verify_server_url};
use wxoa_rs::{Account, AccountStore, CallbackIp, CallbackIpStore, MemoryStore};

#[derive(Clone)]
struct AppState {
    store: Arc<MemoryStore>,
    app_id: String,
}

#[derive(Debug, Deserialize)]
struct WxQuery {
    signature: String,
    timestamp: String,
    nonce: String,
    echostr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber")?;

    let _ = dotenv();

    let app_id = env::var("WX_APPID").context("set WX_APPID")?;
    let secret = env::var("WX_APPSECRET").context("set WX_APPSECRET")?;
    let token = env::var("WX_TOKEN").context("set WX_TOKEN (server callback Token)")?;

    let store = Arc::new(MemoryStore::new());
    let mut account = Account::new("callback-demo", app_id.clone(), secret);
    account.token = Some(token);
    store.save_account(&account).await?;

    if let Ok(list) = env::var("WX_CALLBACK_IPS") {
        for ip in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let entry = CallbackIp::new(app_id.clone(), ip, Some("from WX_CALLBACK_IPS".into()))
                .with_context(|| format!("invalid callback ip {ip}"))?;
            store.add_callback_ip(&entry).await?;
        }
    }

    let state = AppState { store, app_id };
    let app = Router::new()
        .route("/wechat/callback", get(verify))
        .with_state(state);

    let addr: SocketAddr = "0.0.0.0:3000".parse()?;
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn verify(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(q): Query<WxQuery>,
) -> impl IntoResponse {
    match is_callback_ip_allowed(state.store.as_ref(), &state.app_id, peer.ip()).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(%peer, "callback from ip outside the allow-list");
            return (StatusCode::FORBIDDEN, "ip not allowed".to_string());
        }
        Err(e) => {
            warn!(error = %e, "allow-list lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "store error".to_string());
        }
    }

    let account = match state.store.find_account(&state.app_id).await {
        Ok(Some(a)) => a,
        _ => return (StatusCode::NOT_FOUND, "unknown account".to_string()),
    };

    match verify_server_url(&account, &q.timestamp, &q.nonce, &q.signature, &q.echostr) {
        Ok(echo) => (StatusCode::OK, echo),
        Err(e) => {
            warn!(error = %e, "server url verification failed");
            (StatusCode::FORBIDDEN, e.to_string())
        }
    }
}
