//! Azure Blob service client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use url::Url;

use unistore_common::{Error, Result};

use super::auth::AzureCredential;
use super::{check, join_segments, Transport};
use crate::blob::client::{
    BlobClient, BlobItem, BlobProperties, ListPage, ListRequest, UploadOptions, UserDelegationKey,
};
use crate::blob::sas::{sas_time, AccountKey};

const META_PREFIX: &str = "x-ms-meta-";

/// Listing response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobsXml,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobsXml {
    #[serde(rename = "$value", default)]
    items: Vec<BlobsXmlItem>,
}

#[derive(Debug, Deserialize)]
enum BlobsXmlItem {
    Blob(BlobXml),
    BlobPrefix(BlobPrefixXml),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobXml {
    name: String,
    properties: BlobPropertiesXml,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BlobPropertiesXml {
    #[serde(rename = "Last-Modified")]
    last_modified: String,
    #[serde(rename = "Content-Length", default)]
    content_length: u64,
    #[serde(rename = "Content-Type", default)]
    content_type: Option<String>,
    #[serde(rename = "Etag", default)]
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobPrefixXml {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "KeyInfo", rename_all = "PascalCase")]
struct KeyInfo {
    start: String,
    expiry: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserDelegationKeyXml {
    signed_oid: String,
    signed_tid: String,
    signed_start: DateTime<Utc>,
    signed_expiry: DateTime<Utc>,
    signed_service: String,
    signed_version: String,
    value: String,
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn parse_list(body: &str) -> Result<ListPage> {
    let results: EnumerationResults = quick_xml::de::from_str(body)
        .map_err(|e| Error::Serialization(format!("Invalid listing response: {}", e)))?;

    let mut page = ListPage {
        next_marker: results.next_marker.filter(|marker| !marker.is_empty()),
        ..Default::default()
    };
    for item in results.blobs.items {
        match item {
            BlobsXmlItem::Blob(blob) => page.blobs.push(BlobItem {
                name: blob.name,
                properties: BlobProperties {
                    content_length: blob.properties.content_length,
                    last_modified: parse_http_date(&blob.properties.last_modified)
                        .unwrap_or_default(),
                    content_type: blob.properties.content_type.filter(|v| !v.is_empty()),
                    etag: blob.properties.etag,
                    metadata: blob.metadata,
                },
            }),
            BlobsXmlItem::BlobPrefix(prefix) => page.prefixes.push(prefix.name),
        }
    }
    Ok(page)
}

fn properties_from_headers(headers: &HeaderMap) -> BlobProperties {
    let text = |name| headers.get(name).and_then(|value| value.to_str().ok());

    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    BlobProperties {
        content_length: text(CONTENT_LENGTH)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default(),
        last_modified: text(LAST_MODIFIED)
            .and_then(parse_http_date)
            .unwrap_or_default(),
        content_type: text(CONTENT_TYPE).map(str::to_string),
        etag: text(ETAG).map(str::to_string),
        metadata,
    }
}

fn with_metadata(mut builder: RequestBuilder, metadata: &HashMap<String, String>) -> RequestBuilder {
    for (name, value) in metadata {
        builder = builder.header(format!("{}{}", META_PREFIX, name), value);
    }
    builder
}

/// Blob service client for one container.
#[derive(Debug, Clone)]
pub struct AzureBlobClient {
    transport: Transport,
    endpoint: Url,
    account: String,
    container: String,
}

impl AzureBlobClient {
    /// Create a client for `container` at the blob service `endpoint`.
    pub fn new(
        endpoint: Url,
        account: impl Into<String>,
        container: impl Into<String>,
        credential: AzureCredential,
    ) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(credential)?,
            endpoint,
            account: account.into(),
            container: container.into(),
        })
    }

    fn container_url(&self) -> Result<Url> {
        join_segments(&self.endpoint, [self.container.as_str()])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.transport.http().request(method, url)
    }

    async fn send(&self, builder: RequestBuilder, action: &str) -> Result<reqwest::Response> {
        let request = builder
            .build()
            .map_err(|e| Error::Network(format!("Failed to build request: {}", e)))?;
        self.transport.send(request, action).await
    }
}

#[async_trait]
impl BlobClient for AzureBlobClient {
    fn account_name(&self) -> &str {
        &self.account
    }

    fn container_name(&self) -> &str {
        &self.container
    }

    fn blob_url(&self, key: &str) -> Result<Url> {
        join_segments(
            &self.endpoint,
            std::iter::once(self.container.as_str()).chain(key.split('/')),
        )
    }

    fn shared_key(&self) -> Option<&AccountKey> {
        self.transport.credential().account_key()
    }

    #[instrument(skip(self))]
    async fn get_properties(&self, key: &str) -> Result<Option<BlobProperties>> {
        let builder = self.request(Method::HEAD, self.blob_url(key)?);
        let response = self.send(builder, "get blob properties").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, "get blob properties").await?;
        Ok(Some(properties_from_headers(response.headers())))
    }

    #[instrument(skip(self))]
    async fn download(&self, key: &str) -> Result<Option<Bytes>> {
        let builder = self.request(Method::GET, self.blob_url(key)?);
        let response = self.send(builder, "download blob").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check(response, "download blob").await?;
        let content = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read download response: {}", e)))?;
        Ok(Some(content))
    }

    #[instrument(skip(self, data, options), fields(length = data.len()))]
    async fn upload(&self, key: &str, data: Bytes, options: &UploadOptions) -> Result<BlobProperties> {
        let length = data.len() as u64;
        let mut builder = self
            .request(Method::PUT, self.blob_url(key)?)
            .header("x-ms-blob-type", "BlockBlob");
        if let Some(content_type) = &options.content_type {
            builder = builder.header("x-ms-blob-content-type", content_type);
        }
        builder = with_metadata(builder, &options.metadata).body(data);

        let response = check(self.send(builder, "upload blob").await?, "upload blob").await?;
        let written = properties_from_headers(response.headers());
        debug!(key, length, "Uploaded blob");

        Ok(BlobProperties {
            content_length: length,
            last_modified: if written.last_modified == DateTime::<Utc>::default() {
                Utc::now()
            } else {
                written.last_modified
            },
            content_type: options.content_type.clone(),
            etag: written.etag,
            metadata: options.metadata.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<bool> {
        let builder = self
            .request(Method::DELETE, self.blob_url(key)?)
            .header("x-ms-delete-snapshots", "include");
        let response = self.send(builder, "delete blob").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, "delete blob").await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        let mut url = self.container_url()?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("restype", "container")
                .append_pair("comp", "list")
                .append_pair("include", "metadata");
            if !request.prefix.is_empty() {
                query.append_pair("prefix", &request.prefix);
            }
            if let Some(delimiter) = &request.delimiter {
                query.append_pair("delimiter", delimiter);
            }
            if let Some(marker) = &request.marker {
                query.append_pair("marker", marker);
            }
            if request.max_results > 0 {
                query.append_pair("maxresults", &request.max_results.to_string());
            }
        }

        let response = check(
            self.send(self.request(Method::GET, url), "list blobs").await?,
            "list blobs",
        )
        .await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read listing: {}", e)))?;
        parse_list(&body)
    }

    #[instrument(skip(self, metadata))]
    async fn set_metadata(&self, key: &str, metadata: &HashMap<String, String>) -> Result<()> {
        let mut url = self.blob_url(key)?;
        url.query_pairs_mut().append_pair("comp", "metadata");
        let builder = with_metadata(self.request(Method::PUT, url), metadata);

        let response = self.send(builder, "set blob metadata").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::does_not_exist(key));
        }
        check(response, "set blob metadata").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_user_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<UserDelegationKey> {
        if let AzureCredential::SharedKey { .. } = self.transport.credential() {
            return Err(Error::Unsupported(
                "User delegation keys require token credentials".to_string(),
            ));
        }

        let body = quick_xml::se::to_string(&KeyInfo {
            start: sas_time(start),
            expiry: sas_time(expiry),
        })
        .map_err(|e| Error::Serialization(format!("Failed to encode key request: {}", e)))?;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("restype", "service")
            .append_pair("comp", "userdelegationkey");
        let builder = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/xml")
            .body(body);

        let response = check(
            self.send(builder, "get user delegation key").await?,
            "get user delegation key",
        )
        .await?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read key response: {}", e)))?;
        let key: UserDelegationKeyXml = quick_xml::de::from_str(&text)
            .map_err(|e| Error::Serialization(format!("Invalid key response: {}", e)))?;

        Ok(UserDelegationKey {
            signed_oid: key.signed_oid,
            signed_tid: key.signed_tid,
            signed_start: key.signed_start,
            signed_expiry: key.signed_expiry,
            signed_service: key.signed_service,
            signed_version: key.signed_version,
            value: key.value,
        })
    }
}
