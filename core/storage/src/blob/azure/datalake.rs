//! Data Lake directory operations for hierarchical namespace accounts.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, instrument};
use url::Url;

use unistore_common::{Error, Result};

use super::auth::{header_value, AzureCredential};
use super::{check, join_segments, Transport};
use crate::blob::client::DirectoryClient;

const CONTINUATION_HEADER: &str = "x-ms-continuation";

/// Map a blob service endpoint onto the matching dfs endpoint.
pub fn dfs_endpoint(blob_endpoint: &Url) -> Result<Url> {
    let host = blob_endpoint
        .host_str()
        .ok_or_else(|| Error::InvalidInput(format!("Endpoint has no host: {}", blob_endpoint)))?;
    let mut url = blob_endpoint.clone();
    url.set_host(Some(&host.replacen(".blob.", ".dfs.", 1)))
        .map_err(|e| Error::InvalidInput(format!("Invalid dfs endpoint: {}", e)))?;
    Ok(url)
}

/// Directory client for one file system (container).
#[derive(Debug, Clone)]
pub struct AzureDataLakeClient {
    transport: Transport,
    endpoint: Url,
    filesystem: String,
}

impl AzureDataLakeClient {
    /// Create a client from the account's blob service `endpoint`.
    pub fn new(
        blob_endpoint: &Url,
        filesystem: impl Into<String>,
        credential: AzureCredential,
    ) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(credential)?,
            endpoint: dfs_endpoint(blob_endpoint)?,
            filesystem: filesystem.into(),
        })
    }

    fn path_url(&self, key: &str) -> Result<Url> {
        join_segments(
            &self.endpoint,
            std::iter::once(self.filesystem.as_str()).chain(key.split('/')),
        )
    }

    async fn send(&self, builder: RequestBuilder, action: &str) -> Result<Response> {
        let request = builder
            .build()
            .map_err(|e| Error::Network(format!("Failed to build request: {}", e)))?;
        self.transport.send(request, action).await
    }
}

#[async_trait]
impl DirectoryClient for AzureDataLakeClient {
    #[instrument(skip(self))]
    async fn create_directory(&self, key: &str) -> Result<()> {
        let mut url = self.path_url(key)?;
        url.query_pairs_mut().append_pair("resource", "directory");
        let builder = self.transport.http().request(Method::PUT, url);

        check(self.send(builder, "create directory").await?, "create directory").await?;
        info!(key, "Created directory");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_directory(&self, key: &str) -> Result<bool> {
        let mut continuation: Option<String> = None;
        loop {
            let mut url = self.path_url(key)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("recursive", "true");
                if let Some(token) = &continuation {
                    query.append_pair("continuation", token);
                }
            }

            let response = self
                .send(self.transport.http().request(Method::DELETE, url), "delete directory")
                .await?;
            if response.status() == StatusCode::NOT_FOUND && continuation.is_none() {
                return Ok(false);
            }
            let response = check(response, "delete directory").await?;

            continuation = response
                .headers()
                .get(CONTINUATION_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            if continuation.is_none() {
                break;
            }
            debug!(key, "Directory delete continues");
        }

        info!(key, "Deleted directory");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn directory_exists(&self, key: &str) -> Result<bool> {
        let builder = self.transport.http().request(Method::HEAD, self.path_url(key)?);
        let response = self.send(builder, "get path properties").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let response = check(response, "get path properties").await?;
        Ok(response
            .headers()
            .get("x-ms-resource-type")
            .is_some_and(|value| value.as_bytes() == b"directory"))
    }

    #[instrument(skip(self))]
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path_url(from)?;
        let builder = self
            .transport
            .http()
            .request(Method::PUT, self.path_url(to)?)
            .header("x-ms-rename-source", header_value(source.path())?);

        let response = self.send(builder, "rename path").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::does_not_exist(from));
        }
        check(response, "rename path").await?;
        info!(from, to, "Renamed path");
        Ok(())
    }
}
