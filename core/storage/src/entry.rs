//! Serializable snapshot of an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use unistore_common::Result;

use crate::provider::Entry;

/// Flat projection of an [`Entry`] for crossing an API or process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryModel {
    pub name: String,
    pub path: String,
    /// Absent when the backend cannot report it, as for virtual blob folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub is_folder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
}

impl EntryModel {
    /// Snapshot `entry`.
    ///
    /// A failing last-modified lookup is recorded as absent; a failing length
    /// lookup is still an error.
    pub async fn from_entry(entry: &Entry) -> Result<Self> {
        let last_modified = match entry.last_modified().await {
            Ok(at) => Some(at),
            Err(e) => {
                debug!(path = %entry.path(), error = %e, "Last-modified unavailable");
                None
            }
        };

        let length = match entry {
            Entry::File(file) => Some(file.length().await?),
            Entry::Folder(_) => None,
        };

        Ok(Self {
            name: entry.name().to_string(),
            path: entry.path().as_string(),
            last_modified,
            is_folder: entry.is_folder(),
            length,
        })
    }

    /// Snapshot every entry in order.
    pub async fn from_entries(entries: &[Entry]) -> Result<Vec<Self>> {
        let mut models = Vec::with_capacity(entries.len());
        for entry in entries {
            models.push(Self::from_entry(entry).await?);
        }
        Ok(models)
    }
}
