//! Metadata store for converted audio files.
//!
//! Two interchangeable backends implement [`MetadataStore`]: a JSON file
//! rewritten on every mutation, and a SQLite table. Both keep records in
//! creation order and serialize writers behind a single lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{StorageConfig, StoreBackend};

pub mod error;
pub mod json;
pub mod sqlite;

pub use error::StoreError;
pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

/// Records per listing page.
pub const PAGE_SIZE: usize = 10;

/// Outcome status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "Success",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(JobStatus::Success),
            "Failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one completed conversion. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Synthetic identifier; minted on load for legacy entries without one.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String,
    pub file: String,
    /// Size in megabytes.
    pub size: f64,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh successful record.
    pub fn success(title: impl Into<String>, file: impl Into<String>, size: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            file: file.into(),
            size,
            status: JobStatus::Success,
            created_at: Some(Utc::now()),
        }
    }
}

/// One page of records in store order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub records: Vec<JobRecord>,
    /// 1-based page number that was requested.
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Persistence over job records.
///
/// Implementations must be safe to share between request handlers.
pub trait MetadataStore: Send + Sync {
    /// Append a record at the end of store order and make it durable.
    fn append(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Return a 1-based page of [`PAGE_SIZE`] records. Out-of-range pages are empty.
    fn page(&self, page: usize) -> Result<Page, StoreError>;

    /// Find the first record whose `file` equals `file`.
    fn find_by_file(&self, file: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Remove the first record whose `file` equals `file`; returns the removed record.
    fn remove_by_file(&self, file: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Number of stored records.
    fn len(&self) -> Result<usize, StoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Number of pages needed for `total` records.
pub fn total_pages(total: usize) -> usize {
    total.div_ceil(PAGE_SIZE)
}

/// Zero-based offset of a 1-based page, `None` for page 0.
pub fn page_offset(page: usize) -> Option<usize> {
    page.checked_sub(1)?.checked_mul(PAGE_SIZE)
}

/// Slice an in-order collection into a page.
pub fn paginate(records: &[JobRecord], page: usize) -> Page {
    let total = records.len();
    let slice = page_offset(page)
        .filter(|start| *start < total)
        .map(|start| records[start..(start + PAGE_SIZE).min(total)].to_vec())
        .unwrap_or_default();

    Page {
        records: slice,
        page,
        total_pages: total_pages(total),
        total,
    }
}

/// Open the backend selected in the configuration.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn MetadataStore>, StoreError> {
    let store: Arc<dyn MetadataStore> = match config.backend {
        StoreBackend::Json => Arc::new(JsonFileStore::open(&config.metadata_file)?),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.database_path)?),
    };
    tracing::info!(backend = store.backend_name(), "Metadata store opened");
    Ok(store)
}
