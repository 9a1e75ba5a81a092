//! Proxy admin API client.
//!
//! # Purpose
//! Fetches the configuration fingerprint a proxy node is currently running.
//! The registry owns timeouts; clients only report what happened.
use crate::config::ProxyCredentials;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("proxy answered with status {0}")]
    Status(u16),
    #[error("proxy reported an empty fingerprint")]
    EmptyFingerprint,
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Active configuration fingerprint of the node at `addr` (`host:port`).
    async fn fetch_fingerprint(&self, addr: &str) -> Result<String, NodeClientError>;
}

#[derive(Debug, Deserialize)]
struct FingerprintBody {
    fingerprint: String,
}

/// [`NodeClient`] over the proxy's HTTP admin API.
#[derive(Clone)]
pub struct HttpNodeClient {
    http: reqwest::Client,
    credentials: Option<ProxyCredentials>,
}

impl HttpNodeClient {
    pub fn new(credentials: Option<ProxyCredentials>) -> Result<Self, NodeClientError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http, credentials })
    }

    fn url(addr: &str) -> String {
        format!("http://{addr}/api/proxy/config/fingerprint")
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn fetch_fingerprint(&self, addr: &str) -> Result<String, NodeClientError> {
        let mut request = self.http.get(Self::url(addr));
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.user, Some(&creds.password));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeClientError::Status(status.as_u16()));
        }
        let body: FingerprintBody = response.json().await?;
        let fingerprint = body.fingerprint.trim();
        if fingerprint.is_empty() {
            return Err(NodeClientError::EmptyFingerprint);
        }
        Ok(fingerprint.to_string())
    }
}
