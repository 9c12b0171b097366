//! Outbound request description.
//!
//! A request names its path, method and options, the typed payload it expects
//! back, and optionally the account whose access_token decorates the URL.
//! Paths starting with `/` are resolved against `ClientConfig::api_base`.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::account::Accountable;

/// Query parameters and JSON body of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl RequestOptions {
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }
}

/// A WeChat API call.
pub trait ApiRequest: Send + Sync {
    /// Decoded payload type of a successful envelope.
    type Response: DeserializeOwned;

    fn request_path(&self) -> String;

    /// Upstream APIs default to POST.
    fn request_method(&self) -> Method {
        Method::POST
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions::default()
    }

    /// Account whose token is appended to the URL. Requests returning `None`
    /// are never refreshed or retried.
    fn account(&self) -> Option<&Accountable> {
        None
    }
}

/// Generic account-bound request returning the raw JSON payload.
#[derive(Debug, Clone)]
pub struct AccountApiRequest {
    account: Accountable,
    method: Method,
    path: String,
    options: RequestOptions,
}

impl AccountApiRequest {
    pub fn new(account: Accountable, method: Method, path: impl Into<String>) -> Self {
        Self {
            account,
            method,
            path: path.into(),
            options: RequestOptions::default(),
        }
    }

    pub fn get(account: Accountable, path: impl Into<String>) -> Self {
        Self::new(account, Method::GET, path)
    }

    pub fn post(account: Accountable, path: impl Into<String>, body: Value) -> Self {
        Self::new(account, Method::POST, path).with_json(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.query(key, value);
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.options = self.options.json(body);
        self
    }
}

impl ApiRequest for AccountApiRequest {
    type Response = Value;

    fn request_path(&self) -> String {
        self.path.clone()
    }

    fn request_method(&self) -> Method {
        self.method.clone()
    }

    fn request_options(&self) -> RequestOptions {
        self.options.clone()
    }

    fn account(&self) -> Option<&Accountable> {
        Some(&self.account)
    }
}

/// GET /cgi-bin/getcallbackip: IP ranges WeChat uses for server callbacks.
#[derive(Debug, Clone)]
pub struct GetCallbackIpRequest {
    account: Accountable,
}

impl GetCallbackIpRequest {
    pub fn new(account: Accountable) -> Self {
        Self { account }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackIpList {
    #[serde(default)]
    pub ip_list: Vec<String>,
}

impl ApiRequest for GetCallbackIpRequest {
    type Response = CallbackIpList;

    fn request_path(&self) -> String {
        "/cgi-bin/getcallbackip".to_string()
    }

    fn request_method(&self) -> Method {
        Method::GET
    }

    fn account(&self) -> Option<&Accountable> {
        Some(&self.account)
    }
}
