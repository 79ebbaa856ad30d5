//! Control API client
//!
//! Thin JSON-over-HTTP client for the node's control API. Only the session
//! endpoints the orchestrator needs are covered; everything else the wallet
//! does with the node goes through the UI layer.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Errors returned by the control API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The API could not be reached at all
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Wallet has not been initialized")]
    NotInitialized,

    #[error("Wrong password")]
    WrongPassword,

    /// 403: the node is already in the state the call would establish
    #[error("Precondition not met: {0}")]
    Precondition(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the node answered at all (anything but a transport failure)
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ApiError::Transport(_))
    }
}

/// Error body returned by the node
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Map an error response to an [`ApiError`]
pub fn classify_error(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::BAD_REQUEST => ApiError::NotInitialized,
        StatusCode::UNAUTHORIZED => ApiError::WrongPassword,
        StatusCode::FORBIDDEN if message.to_lowercase().contains("not been initialized") => {
            ApiError::NotInitialized
        }
        StatusCode::FORBIDDEN => ApiError::Precondition(message),
        other => ApiError::Status {
            status: other.as_u16(),
            message,
        },
    }
}

/// Parameters of `/unlock`; wiped from memory when dropped
#[derive(Serialize, Zeroize, ZeroizeOnDrop)]
pub struct UnlockRequest {
    pub bitcoind_rpc_username: String,
    pub bitcoind_rpc_password: String,
    pub bitcoind_rpc_host: String,
    pub bitcoind_rpc_port: u16,
    pub indexer_url: String,
    pub proxy_endpoint: String,
    pub password: String,
}

impl fmt::Debug for UnlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockRequest")
            .field("bitcoind_rpc_host", &self.bitcoind_rpc_host)
            .field("bitcoind_rpc_port", &self.bitcoind_rpc_port)
            .field("indexer_url", &self.indexer_url)
            .field("proxy_endpoint", &self.proxy_endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct InitRequest<'a> {
    password: &'a str,
}

#[derive(Deserialize)]
struct InitResponse {
    mnemonic: String,
}

#[derive(Serialize)]
struct BackupBody<'a> {
    backup_path: &'a str,
    password: &'a str,
}

/// Subset of `/nodeinfo` the wallet reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub num_channels: u64,
    #[serde(default)]
    pub num_usable_channels: u64,
    #[serde(default)]
    pub local_balance_msat: u64,
    #[serde(default)]
    pub num_peers: u64,
}

/// Session endpoints of the node's control API
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Base URL requests are sent to
    fn endpoint(&self) -> &Url;

    /// Retarget the client (local port or remote node URL)
    fn set_endpoint(&mut self, url: Url);

    /// Create the wallet; returns the recovery mnemonic
    async fn init(&self, password: &str) -> Result<Zeroizing<String>, ApiError>;

    async fn unlock(&self, request: &UnlockRequest) -> Result<(), ApiError>;

    async fn lock(&self) -> Result<(), ApiError>;

    /// Write an encrypted backup; the node either writes the whole file or nothing
    async fn backup(&self, path: &Path, password: &str) -> Result<(), ApiError>;

    async fn restore(&self, path: &Path, password: &str) -> Result<(), ApiError>;

    async fn status(&self) -> Result<NodeInfo, ApiError>;

    /// Ask the node to shut itself down
    async fn shutdown(&self) -> Result<(), ApiError>;
}

/// reqwest-based control API client
#[derive(Debug, Clone)]
pub struct NodeApiClient {
    base_url: Url,
    client: reqwest::Client,
}

impl NodeApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: with_trailing_slash(base_url),
            client,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Make an API call
    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.request(method, self.url(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            let err = classify_error(status, &text);
            log::debug!("{} {} -> {}", path, status, err);
            return Err(err);
        }

        // Void endpoints answer with `{}` or nothing at all
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn post_void<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<(), ApiError> {
        self.call::<B, IgnoredAny>(Method::POST, path, body).await.map(|_| ())
    }
}

/// Endpoints are joined relative to the base, so a path prefix must end in `/`
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl ControlApi for NodeApiClient {
    fn endpoint(&self) -> &Url {
        &self.base_url
    }

    fn set_endpoint(&mut self, url: Url) {
        let url = with_trailing_slash(url);
        log::info!("Control API endpoint set to {}", url);
        self.base_url = url;
    }

    async fn init(&self, password: &str) -> Result<Zeroizing<String>, ApiError> {
        let response: InitResponse = self
            .call(Method::POST, "init", Some(&InitRequest { password }))
            .await?;
        Ok(Zeroizing::new(response.mnemonic))
    }

    async fn unlock(&self, request: &UnlockRequest) -> Result<(), ApiError> {
        self.post_void("unlock", Some(request)).await
    }

    async fn lock(&self) -> Result<(), ApiError> {
        self.post_void::<()>("lock", None).await
    }

    async fn backup(&self, path: &Path, password: &str) -> Result<(), ApiError> {
        let backup_path = path.to_string_lossy();
        let body = BackupBody {
            backup_path: &backup_path,
            password,
        };
        self.post_void("backup", Some(&body)).await
    }

    async fn restore(&self, path: &Path, password: &str) -> Result<(), ApiError> {
        let backup_path = path.to_string_lossy();
        let body = BackupBody {
            backup_path: &backup_path,
            password,
        };
        self.post_void("restore", Some(&body)).await
    }

    async fn status(&self) -> Result<NodeInfo, ApiError> {
        self.call::<(), NodeInfo>(Method::GET, "nodeinfo", None).await
    }

    async fn shutdown(&self) -> Result<(), ApiError> {
        self.post_void::<()>("shutdown", None).await
    }
}
