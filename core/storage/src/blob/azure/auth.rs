//! Request authorization for the Azure storage REST API.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Request;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use unistore_common::{Error, Result};

use crate::blob::sas::AccountKey;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2023-11-03";

/// Supplies bearer tokens for storage requests.
///
/// How the token is acquired is up to the implementation.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed bearer token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads the bearer token from an environment variable on every request.
pub struct EnvTokenSource {
    variable: String,
}

impl EnvTokenSource {
    pub const DEFAULT_VARIABLE: &'static str = "UNISTORE_ACCESS_TOKEN";

    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl Default for EnvTokenSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VARIABLE)
    }
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn token(&self) -> Result<String> {
        std::env::var(&self.variable).map_err(|_| {
            Error::Authentication(format!("No access token in ${}", self.variable))
        })
    }
}

/// How requests to the storage account are authorized.
#[derive(Clone)]
pub enum AzureCredential {
    /// Shared key signing with the account key.
    SharedKey { account: String, key: AccountKey },
    /// OAuth bearer tokens.
    Token(Arc<dyn TokenSource>),
}

impl fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AzureCredential::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .finish_non_exhaustive(),
            AzureCredential::Token(_) => f.write_str("Token"),
        }
    }
}

impl AzureCredential {
    pub fn account_key(&self) -> Option<&AccountKey> {
        match self {
            AzureCredential::SharedKey { key, .. } => Some(key),
            AzureCredential::Token(_) => None,
        }
    }

    /// Add date, version and authorization headers to `request`.
    pub async fn authorize(&self, request: &mut Request) -> Result<()> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let headers = request.headers_mut();
        headers.insert(HeaderName::from_static("x-ms-date"), header_value(&date)?);
        headers.insert(
            HeaderName::from_static("x-ms-version"),
            HeaderValue::from_static(API_VERSION),
        );

        let authorization = match self {
            AzureCredential::SharedKey { account, key } => {
                let signature = key.sign(&string_to_sign(account, request))?;
                format!("SharedKey {}:{}", account, signature)
            }
            AzureCredential::Token(source) => format!("Bearer {}", source.token().await?),
        };
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(())
    }
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidInput(format!("Invalid header value: {}", e)))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Shared key string-to-sign for the blob and data lake services.
pub(crate) fn string_to_sign(account: &str, request: &Request) -> String {
    let headers = request.headers();
    let content_length = request
        .body()
        .and_then(|body| body.as_bytes())
        .map(|bytes| bytes.len())
        .filter(|len| *len > 0)
        .map(|len| len.to_string())
        .unwrap_or_default();

    let mut text = String::new();
    text.push_str(request.method().as_str());
    text.push('\n');
    for name in ["content-encoding", "content-language"] {
        text.push_str(header(headers, name));
        text.push('\n');
    }
    text.push_str(&content_length);
    text.push('\n');
    for name in [
        "content-md5",
        "content-type",
        "date",
        "if-modified-since",
        "if-match",
        "if-none-match",
        "if-unmodified-since",
        "range",
    ] {
        text.push_str(header(headers, name));
        text.push('\n');
    }

    let canonical_headers: BTreeMap<&str, &str> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or_default().trim()))
        .collect();
    for (name, value) in canonical_headers {
        text.push_str(name);
        text.push(':');
        text.push_str(value);
        text.push('\n');
    }

    text.push_str(&canonical_resource(account, request.url()));
    text
}

fn canonical_resource(account: &str, url: &url::Url) -> String {
    let mut resource = format!("/{}{}", account, url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&values.join(","));
    }
    resource
}
