//! Azure Storage REST clients.
//!
//! This module provides blob and data lake clients with:
//! - Shared key request signing or bearer tokens
//! - Marker-based container listing
//! - User delegation keys for SAS generation
//! - Directory create/delete/rename on hierarchical accounts

pub mod auth;
pub mod client;
pub mod datalake;

use reqwest::{Client, Request, Response, StatusCode};
use url::Url;

use unistore_common::{Error, Result};

pub use auth::{AzureCredential, EnvTokenSource, StaticToken, TokenSource, API_VERSION};
pub use client::AzureBlobClient;
pub use datalake::AzureDataLakeClient;

/// HTTP plumbing shared by the blob and data lake clients.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    http: Client,
    credential: AzureCredential,
}

impl Transport {
    pub fn new(credential: AzureCredential) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("unistore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, credential })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn credential(&self) -> &AzureCredential {
        &self.credential
    }

    /// Sign and send `request`.
    pub async fn send(&self, mut request: Request, action: &str) -> Result<Response> {
        self.credential.authorize(&mut request).await?;
        self.http
            .execute(request)
            .await
            .map_err(|e| Error::Network(format!("Failed to {}: {}", action, e)))
    }
}

/// Append path segments to `base`.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidInput(format!("Endpoint cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Check a response status, mapping failures onto the error type.
pub(crate) async fn check(response: Response, action: &str) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::NOT_FOUND {
        Err(Error::does_not_exist(response.url().path()))
    } else if status == StatusCode::UNAUTHORIZED {
        Err(Error::Authentication(format!(
            "Failed to {}: invalid or expired credentials",
            action
        )))
    } else if status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        Err(Error::PermissionDenied(format!("Failed to {}: {}", action, body)))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(Error::Network(format!(
            "Failed to {}: {} - {}",
            action, status, body
        )))
    }
}
