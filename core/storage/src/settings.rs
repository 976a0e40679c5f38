//! Settings records passed to file creation and external URL generation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use tokio::io::AsyncRead;

use unistore_common::{Error, Result, StoragePath};

use crate::provider::ReadStream;

/// Permission scope of an external URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalAccessType {
    #[default]
    Read,
}

impl ExternalAccessType {
    /// SAS permission letters for this access type.
    pub fn permissions(self) -> &'static str {
        match self {
            ExternalAccessType::Read => "r",
        }
    }
}

/// When an external URL stops working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    /// A fixed point in time.
    Absolute(DateTime<Utc>),
    /// A number of seconds after the URL is generated.
    Relative(i64),
}

impl Expiry {
    pub fn after(duration: Duration) -> Self {
        Expiry::Relative(duration.num_seconds())
    }

    /// Resolve against the generation time.
    ///
    /// # Errors
    /// - `InvalidInput` if a relative expiry overflows the supported date range
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Expiry::Absolute(at) => Ok(*at),
            Expiry::Relative(seconds) => Duration::try_seconds(*seconds)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| {
                    Error::InvalidInput(format!("Expiry of {} seconds is out of range", seconds))
                }),
        }
    }
}

impl Default for Expiry {
    fn default() -> Self {
        Expiry::after(Duration::hours(1))
    }
}

/// Content type reported to whoever follows an external URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTypePolicy {
    /// Use the blob's stored content type.
    Stored,
    /// Guess from the file extension.
    #[default]
    FromExtension,
    /// Always use this value.
    Override(String),
}

/// Settings for generating a time-limited external URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccessSettings {
    #[serde(default)]
    pub access: ExternalAccessType,
    #[serde(default)]
    pub expiry: Expiry,
    #[serde(default)]
    pub content_type: ContentTypePolicy,
}

impl ExternalAccessSettings {
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = ContentTypePolicy::Override(content_type.into());
        self
    }

    /// Content type to sign into the URL for `path`, if any.
    pub fn content_type_for(&self, path: &StoragePath) -> Option<String> {
        match &self.content_type {
            ContentTypePolicy::Stored => None,
            ContentTypePolicy::Override(value) => Some(value.clone()),
            ContentTypePolicy::FromExtension => mime_guess::from_path(path.name())
                .first()
                .map(|mime| mime.essence_str().to_string()),
        }
    }
}

/// Arguments for `FolderEntry::create_file`.
#[derive(Default)]
pub struct CreateFileArgs {
    /// Initial content; the file is created empty when absent.
    pub content: Option<ReadStream>,
    /// Explicit content type; backends that store one guess it otherwise.
    pub content_type: Option<String>,
    /// User properties stored alongside the content where supported.
    pub properties: HashMap<String, String>,
}

impl CreateFileArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(mut self, content: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.content = Some(Box::new(content));
        self
    }

    pub fn with_bytes(self, data: impl Into<Vec<u8>>) -> Self {
        self.with_content(Cursor::new(data.into()))
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

impl fmt::Debug for CreateFileArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateFileArgs")
            .field("content", &self.content.as_ref().map(|_| "<stream>"))
            .field("content_type", &self.content_type)
            .field("properties", &self.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_expiry_is_one_hour() {
        let now = Utc::now();
        let settings = ExternalAccessSettings::default();
        assert_eq!(settings.expiry.resolve(now).unwrap(), now + Duration::hours(1));
        assert_eq!(settings.access.permissions(), "r");
    }

    #[test]
    fn test_absolute_expiry() {
        let at = Utc::now() + Duration::days(2);
        assert_eq!(Expiry::Absolute(at).resolve(Utc::now()).unwrap(), at);
    }

    #[test]
    fn test_content_type_policies() {
        let path = StoragePath::parse("docs/report.pdf").unwrap();
        let settings = ExternalAccessSettings::default();
        assert_eq!(settings.content_type_for(&path).as_deref(), Some("application/pdf"));

        let settings = settings.with_content_type("text/plain");
        assert_eq!(settings.content_type_for(&path).as_deref(), Some("text/plain"));

        let settings = ExternalAccessSettings {
            content_type: ContentTypePolicy::Stored,
            ..Default::default()
        };
        assert_eq!(settings.content_type_for(&path), None);
    }

    #[test]
    fn test_unknown_extension_has_no_content_type() {
        let path = StoragePath::parse("data.unknownext").unwrap();
        assert_eq!(ExternalAccessSettings::default().content_type_for(&path), None);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: ExternalAccessSettings =
            serde_json::from_str(r#"{"expiry":{"relative":600}}"#).unwrap();
        assert_eq!(settings.expiry, Expiry::Relative(600));
        assert_eq!(settings.content_type, ContentTypePolicy::FromExtension);
    }

    #[test]
    fn test_out_of_range_expiry_is_rejected() {
        let now = Utc::now();
        let settings: ExternalAccessSettings =
            serde_json::from_value(serde_json::json!({ "expiry": { "relative": i64::MAX } }))
                .unwrap();
        assert!(matches!(settings.expiry.resolve(now), Err(Error::InvalidInput(_))));
        assert!(matches!(
            Expiry::Relative(i64::MIN).resolve(now),
            Err(Error::InvalidInput(_))
        ));
        assert!(Expiry::Relative(-60).resolve(now).unwrap() < now);
    }
}
