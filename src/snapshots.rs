//! Snapshot lifecycle operations against one cluster node.
//!
//! Management calls (list/create/delete) go to the node's control-plane
//! endpoint, downloads to its data-plane endpoint. The access credential
//! rides along as the `api-key` header on every request.

use std::io;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use reqwest::{Client, Response, Url};
use serde::Deserialize;

use crate::error::{BackupError, Result};

/// Header carrying the access credential.
const API_KEY_HEADER: &str = "api-key";

/// Byte stream of a snapshot download.
pub type SnapshotStream = BoxStream<'static, io::Result<Bytes>>;

/// One snapshot as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotDescription {
    /// Server-assigned snapshot name.
    pub name: String,
    /// Size in bytes, when the service reports it.
    #[serde(default)]
    pub size: Option<u64>,
    /// Creation timestamp, when the service reports it.
    #[serde(default)]
    pub creation_time: Option<String>,
}

/// Snapshot management surface of a single node.
#[async_trait]
pub trait SnapshotApi: Send + Sync {
    /// All snapshots currently held for `collection` on this node.
    async fn list_snapshots(&self, collection: &str) -> Result<Vec<SnapshotDescription>>;

    /// Request a new snapshot of `collection`; the service picks the name.
    async fn create_snapshot(&self, collection: &str) -> Result<SnapshotDescription>;

    /// Delete one named snapshot of `collection`.
    async fn delete_snapshot(&self, collection: &str, snapshot: &str) -> Result<()>;

    /// Open a byte stream for one named snapshot of `collection`.
    async fn download_snapshot(&self, collection: &str, snapshot: &str) -> Result<SnapshotStream>;
}

/// Delete every snapshot of `collection` on the node behind `api`.
///
/// Deletion stops at the first failure; snapshots removed before that
/// point stay removed.
pub async fn remove_all_snapshots(api: &dyn SnapshotApi, collection: &str) -> Result<()> {
    let snapshots = api.list_snapshots(collection).await?;
    for snapshot in snapshots {
        api.delete_snapshot(collection, &snapshot.name).await?;
    }

    Ok(())
}

/// JSON envelope wrapping every management response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

/// `SnapshotApi` over the node's HTTP API.
pub struct HttpSnapshotApi {
    http: Client,
    control_base: Url,
    data_base: Url,
    api_key: String,
}

impl HttpSnapshotApi {
    pub fn new(http: Client, control_base: Url, data_base: Url, api_key: String) -> Self {
        Self {
            http,
            control_base,
            data_base,
            api_key,
        }
    }

    /// Handle for a discovered member address with well-known ports.
    pub fn for_address(
        http: Client,
        address: Ipv4Addr,
        control_port: u16,
        data_port: u16,
        api_key: &str,
    ) -> Result<Self> {
        let control_base = Url::parse(&format!("http://{address}:{control_port}"))
            .map_err(|e| BackupError::Config(format!("invalid control-plane URL for {address}: {e}")))?;
        let data_base = Url::parse(&format!("http://{address}:{data_port}"))
            .map_err(|e| BackupError::Config(format!("invalid data-plane URL for {address}: {e}")))?;

        Ok(Self::new(http, control_base, data_base, api_key.to_string()))
    }

    fn join(base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| BackupError::Api(format!("invalid URL `{path}`: {e}")))
    }
}

/// Fail on a non-success status, keeping a snippet of the response body.
async fn expect_success(response: Response, step: &str, collection: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    body.truncate(256);
    Err(BackupError::Api(format!(
        "could not {step} for `{collection}`: {status}: {body}"
    )))
}

#[async_trait]
impl SnapshotApi for HttpSnapshotApi {
    async fn list_snapshots(&self, collection: &str) -> Result<Vec<SnapshotDescription>> {
        let url = Self::join(&self.control_base, &format!("collections/{collection}/snapshots"))?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| {
                BackupError::Api(format!("could not list snapshots for `{collection}`: {e}"))
            })?;
        let response = expect_success(response, "list snapshots", collection).await?;

        let body: ApiResponse<Vec<SnapshotDescription>> = response.json().await.map_err(|e| {
            BackupError::Api(format!("could not decode snapshot list for `{collection}`: {e}"))
        })?;

        Ok(body.result)
    }

    async fn create_snapshot(&self, collection: &str) -> Result<SnapshotDescription> {
        let url = Self::join(&self.control_base, &format!("collections/{collection}/snapshots"))?;
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| {
                BackupError::Api(format!("could not create snapshot for `{collection}`: {e}"))
            })?;
        let response = expect_success(response, "create snapshot", collection).await?;

        let body: ApiResponse<SnapshotDescription> = response.json().await.map_err(|e| {
            BackupError::Api(format!(
                "could not decode created snapshot for `{collection}`: {e}"
            ))
        })?;

        Ok(body.result)
    }

    async fn delete_snapshot(&self, collection: &str, snapshot: &str) -> Result<()> {
        let url = Self::join(
            &self.control_base,
            &format!("collections/{collection}/snapshots/{snapshot}"),
        )?;
        let response = self
            .http
            .delete(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| {
                BackupError::Api(format!(
                    "could not delete snapshot `{snapshot}` for `{collection}`: {e}"
                ))
            })?;
        expect_success(response, "delete snapshot", collection).await?;

        Ok(())
    }

    async fn download_snapshot(&self, collection: &str, snapshot: &str) -> Result<SnapshotStream> {
        let url = Self::join(
            &self.data_base,
            &format!("collections/{collection}/snapshots/{snapshot}"),
        )?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| {
                BackupError::Download(format!(
                    "could not download snapshot `{snapshot}` of `{collection}`: {e}"
                ))
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackupError::Download(format!(
                "could not download snapshot `{snapshot}` of `{collection}`: {status}"
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        Ok(Box::pin(stream))
    }
}
