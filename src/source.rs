//! Where snapshots come from and where commands go.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, trace};
use url::Url;

use crate::error::SourceError;
use crate::state::{decode_snapshots, TransferSnapshot};
use crate::utils::parse_base_url;

/// Parameters for starting a new transfer on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartRequest {
    pub url: String,
    pub file_name: Option<String>,
    pub segments: Option<u32>,
}

/// A transfer backend: a readable list of transfers and a command surface.
///
/// Commands are fire-and-acknowledge. `Ok(())` means the backend received the
/// command, not that it has taken effect; effects show up in later snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch_all(&self) -> Result<Vec<TransferSnapshot>, SourceError>;

    async fn start(&self, request: &StartRequest) -> Result<TransferSnapshot, SourceError>;

    async fn pause(&self, transfer_id: u64) -> Result<(), SourceError>;

    async fn resume(&self, transfer_id: u64) -> Result<(), SourceError>;
}

/// REST client for the transfer backend.
pub struct HttpSnapshotSource {
    client: Client,
    base: Url,
}

impl HttpSnapshotSource {
    pub fn new(server: &str, request_timeout: Duration) -> Result<Self, SourceError> {
        let base = parse_base_url(server)?;
        let client = Client::builder()
            .user_agent(concat!("segwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base
            .join(path)
            .map_err(|e| SourceError::InvalidLocator(format!("{path}: {e}")))
    }

    fn check(response: Response, endpoint: &Url) -> Result<Response, SourceError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                endpoint: endpoint.to_string(),
                status,
            });
        }
        Ok(response)
    }

    async fn post_command(&self, transfer_id: u64, verb: &str) -> Result<(), SourceError> {
        let endpoint = self.endpoint(&format!("downloads/{transfer_id}/{verb}"))?;
        debug!(transfer_id, verb, "sending command");
        let response = self.client.post(endpoint.clone()).send().await?;
        Self::check(response, &endpoint)?;
        Ok(())
    }

    pub async fn fetch_one(&self, transfer_id: u64) -> Result<TransferSnapshot, SourceError> {
        let endpoint = self.endpoint(&format!("downloads/{transfer_id}"))?;
        let response = self.client.get(endpoint.clone()).send().await?;
        let body = Self::check(response, &endpoint)?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_all(&self) -> Result<Vec<TransferSnapshot>, SourceError> {
        let endpoint = self.endpoint("downloads")?;
        let response = self.client.get(endpoint.clone()).send().await?;
        let body = Self::check(response, &endpoint)?.text().await?;
        trace!(bytes = body.len(), "fetched snapshot payload");
        decode_snapshots(&body)
    }

    async fn start(&self, request: &StartRequest) -> Result<TransferSnapshot, SourceError> {
        let mut endpoint = self.endpoint("downloads")?;
        {
            let mut query = endpoint.query_pairs_mut();
            query.append_pair("url", &request.url);
            if let Some(name) = request.file_name.as_deref().filter(|n| !n.is_empty()) {
                query.append_pair("fileName", name);
            }
            if let Some(segments) = request.segments.filter(|s| *s > 0) {
                query.append_pair("threadCount", &segments.to_string());
            }
        }
        debug!(url = %request.url, "starting transfer");
        let response = self.client.post(endpoint.clone()).send().await?;
        let body = Self::check(response, &endpoint)?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn pause(&self, transfer_id: u64) -> Result<(), SourceError> {
        self.post_command(transfer_id, "pause").await
    }

    async fn resume(&self, transfer_id: u64) -> Result<(), SourceError> {
        self.post_command(transfer_id, "resume").await
    }
}
