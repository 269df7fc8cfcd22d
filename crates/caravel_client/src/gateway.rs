//! HTTP client for the gateway control API.

use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, Url};
use serde::Deserialize;

use caravel_compute::Server;
use caravel_core::{ChunkRequest, ChunkState};

use crate::errors::{Error, Result};

/// The User-Agent string.
pub(crate) const USER_AGENT: &str = concat!("caravel/", env!("CARGO_PKG_VERSION"));

/// Client for one gateway's control API.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    /// Instance name, carried into error values.
    instance: String,
    /// Base endpoint of the gateway.
    endpoint: Url,
    /// An initialized HTTP client.
    client: HttpClient,
}

/// One row of a gateway's chunk-state log, as returned on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkStatusEntry {
    pub chunk_id: u64,
    pub state: ChunkState,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CompressionProfile {
    #[serde(default)]
    pub compressed_bytes_sent: u64,
    #[serde(default)]
    pub uncompressed_bytes_sent: u64,
}

#[derive(Debug, Deserialize)]
struct ChunkStatusLogReply {
    chunk_status_log: Vec<ChunkStatusEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorsReply {
    errors: Vec<String>,
}

impl GatewayClient {
    pub fn new(instance_name: impl Into<String>, api_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Self::with_http(client, instance_name, api_url)
    }

    /// Build on an existing HTTP client so a fleet of gateway handles shares
    /// one connection pool.
    pub fn with_http(
        client: HttpClient,
        instance_name: impl Into<String>,
        api_url: &str,
    ) -> Result<Self> {
        let endpoint = Url::parse(api_url)
            .map_err(|e| Error::Configuration(format!("invalid gateway api url {api_url}: {e}")))?;

        Ok(Self {
            instance: instance_name.into(),
            endpoint,
            client,
        })
    }

    pub fn for_server(server: &dyn Server, http: HttpClient) -> Result<Self> {
        Self::with_http(http, server.instance_name(), &server.gateway_api_url())
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| Error::Configuration(format!("invalid gateway api path {path}: {e}")))
    }

    /// Dispatch a batch of chunk requests. Any non-200 reply fails the plan.
    pub async fn send_chunk_requests(&self, requests: &[ChunkRequest]) -> Result<()> {
        let res = self
            .client
            .post(self.join("api/v1/chunk_requests")?)
            .json(requests)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Error::Dispatch {
                instance: self.instance.clone(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub async fn chunk_status_log(&self) -> Result<Vec<ChunkStatusEntry>> {
        let res = self
            .client
            .get(self.join("api/v1/chunk_status_log")?)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(self.api_error("api/v1/chunk_status_log", res).await);
        }
        let reply: ChunkStatusLogReply = res.json().await?;
        Ok(reply.chunk_status_log)
    }

    /// The gateway's accumulated error log; an empty list means healthy.
    pub async fn error_log(&self) -> Result<Vec<String>> {
        let res = self.client.get(self.join("api/v1/errors")?).send().await?;
        if !res.status().is_success() {
            return Err(self.api_error("api/v1/errors", res).await);
        }
        let reply: ErrorsReply = res.json().await?;
        Ok(reply.errors)
    }

    pub async fn compression_profile(&self) -> Result<CompressionProfile> {
        let res = self
            .client
            .get(self.join("api/v1/profile/compression")?)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(self.api_error("api/v1/profile/compression", res).await);
        }
        Ok(res.json().await?)
    }

    /// Raw receiver socket profile body, written to disk verbatim.
    pub async fn socket_profile(&self) -> Result<String> {
        let res = self
            .client
            .get(self.join("api/v1/profile/socket/receiver")?)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(self.api_error("api/v1/profile/socket/receiver", res).await);
        }
        Ok(res.text().await?)
    }

    /// Ask the gateway to shut down. Connection errors are expected here (the
    /// server may already be going down) and are swallowed.
    pub async fn shutdown(&self) {
        let url = match self.join("api/v1/shutdown") {
            Ok(url) => url,
            Err(_) => return,
        };
        if let Err(e) = self.client.post(url).send().await {
            tracing::debug!(instance = %self.instance, "shutdown request failed: {e}");
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    async fn api_error(&self, path: &str, res: reqwest::Response) -> Error {
        Error::GatewayApi {
            instance: self.instance.clone(),
            path: path.to_string(),
            body: res.text().await.unwrap_or_default(),
        }
    }
}
