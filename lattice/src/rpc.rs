//! JSON-RPC collaborator.
//!
//! Chain nodes are reached through [`RpcSubmit`]. [`JsonRpcClient`] is the
//! HTTP implementation. Numbers are decoded with `serde_json`'s
//! `arbitrary_precision`, so large integers (balances, nonces) survive
//! untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::error::{Result, WalletError};

/// Something that can submit a JSON-RPC call.
#[async_trait]
pub trait RpcSubmit: Send + Sync {
    /// Call `method` with positional `params` and return the `result` value.
    async fn submit(&self, method: &str, params: Vec<Value>) -> Result<Value>;
}

/// Decode a JSON-RPC response body.
///
/// # Errors
///
/// Returns [`WalletError::Rpc`] if the body is not JSON, carries an `error`,
/// or has no `result` member.
pub fn parse_response(body: &str) -> Result<Value> {
    let mut data: Value = serde_json::from_str(body)
        .map_err(|e| WalletError::Rpc(format!("invalid JSON-RPC response: {e}")))?;

    match data.get("error") {
        None | Some(Value::Null) => {}
        Some(error) => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .or_else(|| error.as_str())
                .map_or_else(|| error.to_string(), str::to_owned);
            return Err(WalletError::Rpc(message));
        }
    }

    data.as_object_mut()
        .and_then(|object| object.remove("result"))
        .ok_or_else(|| WalletError::Rpc("Missing `result` on the RPC call result".into()))
}

/// HTTP JSON-RPC client.
///
/// ```rust,ignore
/// let node = JsonRpcClient::new("http://localhost:8332")?
///     .with_basic_auth("user", "pass");
/// let height = node.submit("getblockcount", vec![]).await?;
/// ```
pub struct JsonRpcClient {
    http_client: reqwest::Client,
    url: Url,
    auth: Option<(String, String)>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("url", &self.url.as_str())
            .field("auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a client for `url` with no timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Config`] if the URL does not parse.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| WalletError::config(format!("invalid rpc url '{url}': {e}")))?;
        Ok(Self {
            http_client: reqwest::Client::new(),
            url,
            auth: None,
            next_id: AtomicU64::new(1),
        })
    }

    /// Set a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Config`] if the HTTP client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::config(format!("failed to build http client: {e}")))?;
        Ok(self)
    }

    /// Authenticate with HTTP basic auth.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    /// Node URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Build the request envelope, assigning the next id.
    pub fn prepare_request(&self, method: &str, params: Vec<Value>) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        json!({ "id": id, "method": method, "params": params })
    }
}

#[async_trait]
impl RpcSubmit for JsonRpcClient {
    async fn submit(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = self.prepare_request(method, params);
        debug!(method, id = %request["id"], "jsonrpc request");

        let mut builder = self.http_client.post(self.url.clone()).json(&request);
        if let Some((username, password)) = &self.auth {
            builder = builder.basic_auth(username, Some(password));
        }

        // Error statuses still carry a JSON-RPC body worth decoding.
        let body = builder
            .send()
            .await
            .map_err(|e| WalletError::Rpc(format!("request failed: {e}")))?
            .text()
            .await
            .map_err(|e| WalletError::Rpc(format!("failed to read response: {e}")))?;

        parse_response(&body)
    }
}
