//! File records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageTier;

/// Persisted file metadata. A non-deleted record always has a backing object
/// at `storage_key` on `storage_tier`; the key is fully qualified and must be
/// passed back to the provider verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub user_id: String,
    pub folder_id: Option<String>,
    pub original_name: String,
    pub mime_type: String,
    /// Bytes; set once at assembly, never mutated
    pub size: u64,
    pub storage_key: String,
    pub storage_tier: StorageTier,
    /// Hex SHA-256 when known
    pub hash: Option<String>,
    /// Monotonic third-party download counter
    pub downloads: u64,
    /// Bounded set of distinct downloader IPs
    pub unique_download_ips: Vec<String>,
    pub last_access_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    /// Set when the record is soft-deleted; drives hard-removal grace
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Whether the file is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }

    /// Live = not soft-deleted and not expired
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted && !self.is_expired(now)
    }
}

/// Non-sensitive projection returned by the download-info endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&FileRecord> for FileView {
    fn from(file: &FileRecord) -> Self {
        Self {
            id: file.id.clone(),
            name: file.original_name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.size,
            downloads: file.downloads,
            created_at: file.created_at,
            expires_at: file.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> FileRecord {
        FileRecord {
            id: "f1".into(),
            user_id: "u1".into(),
            folder_id: None,
            original_name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 42,
            storage_key: "hot/u1/k/report.pdf".into(),
            storage_tier: StorageTier::Hot,
            hash: None,
            downloads: 0,
            unique_download_ips: Vec::new(),
            last_access_at: Utc::now(),
            expires_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unexpiring_file_is_live() {
        assert!(record().is_live(Utc::now()));
    }

    #[test]
    fn past_expiry_is_not_live() {
        let mut file = record();
        file.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(file.is_expired(Utc::now()));
        assert!(!file.is_live(Utc::now()));
    }

    #[test]
    fn view_omits_storage_key() {
        let json = serde_json::to_string(&FileView::from(&record())).unwrap();
        assert!(!json.contains("storage"));
    }
}
