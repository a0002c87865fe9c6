//! Job lifecycle: one conversion per request, from URL to stored record.
//!
//! A submitted job moves `Received -> Extracting -> Persisted | Rejected`
//! within a single call. Nothing about an in-flight job is persisted; a record
//! is appended only after the extractor has produced the file. Deletion
//! removes the file first and the record second.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::extractors::{JobOutcome, MediaExtractor};
use crate::store::{JobRecord, JobStatus, MetadataStore, Page};
use crate::utils;
use crate::JobError;

/// Lifecycle state of a conversion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Extracting,
    Persisted,
    Rejected,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Received => "received",
            JobState::Extracting => "extracting",
            JobState::Persisted => "persisted",
            JobState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Structured answer to a submit call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub status: JobStatus,
    pub title: Option<String>,
    pub file: Option<String>,
    pub size: f64,
}

impl SubmitOutcome {
    pub fn failed() -> Self {
        Self {
            status: JobStatus::Failed,
            title: None,
            file: None,
            size: 0.0,
        }
    }
}

impl From<&JobRecord> for SubmitOutcome {
    fn from(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            title: Some(record.title.clone()),
            file: Some(record.file.clone()),
            size: record.size,
        }
    }
}

/// Result of a delete request
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The file was removed; `record` is the metadata entry removed with it, if any.
    Deleted {
        file: String,
        record: Option<JobRecord>,
    },
    /// No such file in the storage directory. The store was not touched.
    NotFound(String),
}

/// Coordinates the extractor, the storage directory and the metadata store
pub struct JobManager {
    extractor: Arc<dyn MediaExtractor>,
    store: Arc<dyn MetadataStore>,
    download_dir: PathBuf,
    limiter: Arc<Semaphore>,
    max_jobs: usize,
    timeout: Option<Duration>,
}

impl JobManager {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        store: Arc<dyn MetadataStore>,
        download_dir: impl Into<PathBuf>,
        max_jobs: usize,
    ) -> Self {
        let max_jobs = max_jobs.max(1);
        Self {
            extractor,
            store,
            download_dir: download_dir.into(),
            limiter: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
            timeout: None,
        }
    }

    pub fn from_config(
        config: &Config,
        extractor: Arc<dyn MediaExtractor>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::new(
            extractor,
            store,
            config.storage.download_dir.clone(),
            config.extractor.max_concurrent_jobs,
        )
        .with_timeout(config.extraction_timeout())
    }

    /// Abort extractions that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Conversion slots currently free
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Convert `url` and record the result.
    ///
    /// The extraction and the metadata append run on a spawned task, so a
    /// caller that goes away does not leave a file without its record.
    pub async fn submit(&self, url: &str) -> Result<JobRecord, JobError> {
        let url = url.trim();
        tracing::debug!(state = %JobState::Received, url, "Conversion requested");

        if url.is_empty() {
            tracing::warn!("User submitted empty YouTube URL.");
            tracing::debug!(state = %JobState::Rejected, "Conversion rejected");
            return Err(JobError::InvalidInput);
        }

        let permit = self
            .limiter
            .clone()
            .try_acquire_owned()
            .map_err(|_| JobError::Busy(self.max_jobs))?;

        tracing::debug!(
            state = %JobState::Extracting,
            url,
            tool = self.extractor.tool_name(),
            "Extraction started"
        );

        let extractor = self.extractor.clone();
        let store = self.store.clone();
        let job_url = url.to_string();
        let mut worker = tokio::spawn(async move {
            let _permit = permit;
            match extractor.extract(&job_url).await {
                JobOutcome::Success(audio) => {
                    let record = JobRecord::success(audio.title, audio.file, audio.size);
                    let appended =
                        tokio::task::spawn_blocking(move || store.append(&record).map(|()| record))
                            .await;
                    match appended {
                        Ok(Ok(record)) => Ok(record),
                        Ok(Err(e)) => Err(JobError::StorageWriteFailure(e)),
                        Err(e) => {
                            tracing::error!("Metadata append task failed: {}", e);
                            Err(JobError::ExtractionFailure)
                        }
                    }
                }
                JobOutcome::Failed => Err(JobError::ExtractionFailure),
            }
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut worker).await {
                Ok(joined) => joined,
                Err(_) => {
                    worker.abort();
                    tracing::error!("Conversion of {} timed out after {:?}", url, limit);
                    tracing::debug!(state = %JobState::Rejected, "Conversion rejected");
                    return Err(JobError::ExtractionFailure);
                }
            },
            None => worker.await,
        };

        let result = joined.unwrap_or_else(|e| {
            tracing::error!("Conversion worker failed: {}", e);
            Err(JobError::ExtractionFailure)
        });

        match &result {
            Ok(record) => {
                tracing::debug!(
                    state = %JobState::Persisted,
                    id = %record.id,
                    file = %record.file,
                    size_mb = record.size,
                    "Song data added"
                );
            }
            Err(JobError::StorageWriteFailure(e)) => {
                tracing::error!("Converted {} but failed to record it: {}", url, e);
            }
            Err(_) => {
                tracing::debug!(state = %JobState::Rejected, "Conversion rejected");
            }
        }

        result
    }

    /// One page of records in store order.
    ///
    /// Reads the store synchronously; async callers run it on a blocking thread.
    pub fn list(&self, page: usize) -> Result<Page, JobError> {
        let page = self.store.page(page)?;
        tracing::debug!(
            "Listing page {} of {} ({} records)",
            page.page,
            page.total_pages,
            page.total
        );
        Ok(page)
    }

    /// Delete a file and its metadata record.
    ///
    /// `requested` may be URL-encoded. A missing file is reported as
    /// [`DeleteOutcome::NotFound`] without touching the store, even if a stale
    /// record still names it.
    pub fn delete(&self, requested: &str) -> Result<DeleteOutcome, JobError> {
        let file = urlencoding::decode(requested)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| requested.to_string());
        tracing::debug!("Attempting to delete file: {}", file);

        let path = match self.locate(&file) {
            Some(path) => path,
            None => {
                tracing::warn!("File not found: {}", file);
                return Ok(DeleteOutcome::NotFound(file));
            }
        };

        if let Err(source) = fs_err::remove_file(&path) {
            tracing::error!("Error deleting file: {}", source);
            return Err(JobError::DeletionFailure { file, source });
        }

        let record = self.store.remove_by_file(&file)?;
        if record.is_none() {
            tracing::debug!("No metadata record referenced {}", file);
        }
        tracing::debug!("Deleted file: {}", file);

        Ok(DeleteOutcome::Deleted { file, record })
    }

    /// Absolute path of a stored file, for download
    pub fn resolve_download(&self, file: &str) -> Result<PathBuf, JobError> {
        tracing::debug!("Initiating download for file: {}", file);
        self.locate(file)
            .ok_or_else(|| JobError::FileNotFound(file.to_string()))
    }

    fn locate(&self, file: &str) -> Option<PathBuf> {
        if !utils::is_safe_filename(file) {
            return None;
        }
        let path = self.download_dir.join(file);
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{ExtractedAudio, MockMediaExtractor};
    use crate::store::{JsonFileStore, SqliteStore};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    fn json_store(dir: &TempDir) -> Arc<dyn MetadataStore> {
        Arc::new(JsonFileStore::open(&dir.path().join("songs_metadata.json")).unwrap())
    }

    fn write_song(dir: &Path, file: &str) -> ExtractedAudio {
        let path = dir.join(file);
        std::fs::write(&path, vec![7u8; 2048]).unwrap();
        ExtractedAudio {
            title: file.trim_end_matches(".mp3").to_string(),
            file: file.to_string(),
            path,
            size: utils::bytes_to_megabytes(2048),
        }
    }

    /// Extractor that blocks until released.
    struct GatedExtractor {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl MediaExtractor for GatedExtractor {
        async fn extract(&self, _url: &str) -> JobOutcome {
            self.gate.notified().await;
            JobOutcome::Failed
        }

        fn tool_name(&self) -> &'static str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_empty_url_never_reaches_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = MockMediaExtractor::new();
        extractor.expect_extract().times(0);
        extractor.expect_tool_name().return_const("mock");

        let store = json_store(&dir);
        let manager = JobManager::new(Arc::new(extractor), store.clone(), dir.path(), 1);

        assert!(matches!(manager.submit("").await, Err(JobError::InvalidInput)));
        assert!(matches!(manager.submit("   ").await, Err(JobError::InvalidInput)));
        assert_eq!(store.len().unwrap(), 0);
        assert!(!dir.path().join("songs_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_successful_extraction_is_appended_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir);
        store
            .append(&JobRecord::success("Earlier", "Earlier.mp3", 1.0))
            .unwrap();

        let audio = write_song(dir.path(), "My Song.mp3");
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_extract()
            .withf(|url| url == "https://youtu.be/abc")
            .times(1)
            .returning(move |_| JobOutcome::Success(audio.clone()));
        extractor.expect_tool_name().return_const("mock");

        let manager = JobManager::new(Arc::new(extractor), store.clone(), dir.path(), 1);
        let record = assert_ok!(manager.submit("  https://youtu.be/abc ").await);

        assert_eq!(record.title, "My Song");
        assert_eq!(record.file, "My Song.mp3");
        assert_eq!(record.status, JobStatus::Success);
        assert!(record.size > 0.0);

        let page = manager.list(1).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.last().unwrap(), &record);
        assert_eq!(manager.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_failed_extraction_leaves_store_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|_| JobOutcome::Failed);
        extractor.expect_tool_name().return_const("mock");

        let store = json_store(&dir);
        let manager = JobManager::new(Arc::new(extractor), store.clone(), dir.path(), 1);

        let err = assert_err!(manager.submit("https://example.com/broken").await);
        assert!(matches!(err, JobError::ExtractionFailure));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_write_failure_keeps_file_and_adds_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = dir.path().join("songs_metadata.json");
        let store: Arc<dyn MetadataStore> = Arc::new(JsonFileStore::open(&metadata).unwrap());
        // The rewrite cannot replace a directory.
        std::fs::create_dir(&metadata).unwrap();

        let audio = write_song(dir.path(), "Kept.mp3");
        let produced = audio.path.clone();
        let mut extractor = MockMediaExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(move |_| JobOutcome::Success(audio.clone()));
        extractor.expect_tool_name().return_const("mock");

        let manager = JobManager::new(Arc::new(extractor), store.clone(), dir.path(), 1);
        let err = assert_err!(manager.submit("https://youtu.be/kept").await);

        assert!(matches!(err, JobError::StorageWriteFailure(_)));
        assert!(produced.is_file());
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(manager.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_timeout_rejects_job() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let store = json_store(&dir);
        let manager = JobManager::new(
            Arc::new(GatedExtractor { gate }),
            store.clone(),
            dir.path(),
            1,
        )
        .with_timeout(Some(Duration::from_millis(50)));

        let err = assert_err!(manager.submit("https://example.com/slow").await);
        assert!(matches!(err, JobError::ExtractionFailure));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_busy_when_all_slots_taken() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let manager = Arc::new(JobManager::new(
            Arc::new(GatedExtractor { gate: gate.clone() }),
            json_store(&dir),
            dir.path(),
            1,
        ));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.submit("https://example.com/1").await })
        };
        while manager.available_slots() > 0 {
            tokio::task::yield_now().await;
        }

        let err = assert_err!(manager.submit("https://example.com/2").await);
        assert!(matches!(err, JobError::Busy(1)));

        gate.notify_one();
        assert!(matches!(
            first.await.unwrap(),
            Err(JobError::ExtractionFailure)
        ));
    }

    #[test]
    fn test_delete_removes_file_and_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let audio = write_song(dir.path(), "My Song.mp3");
        store
            .append(&JobRecord::success(audio.title, audio.file, audio.size))
            .unwrap();
        store
            .append(&JobRecord::success("Other", "Other.mp3", 1.0))
            .unwrap();

        let manager = JobManager::new(
            Arc::new(MockMediaExtractor::new()),
            store.clone(),
            dir.path(),
            1,
        );

        let outcome = manager.delete("My%20Song.mp3").unwrap();
        match outcome {
            DeleteOutcome::Deleted { file, record } => {
                assert_eq!(file, "My Song.mp3");
                assert_eq!(record.unwrap().title, "My Song");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!audio.path.exists());
        assert_eq!(store.len().unwrap(), 1);

        // Second delete is a no-op.
        assert_eq!(
            manager.delete("My Song.mp3").unwrap(),
            DeleteOutcome::NotFound("My Song.mp3".to_string())
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_delete_missing_file_keeps_stale_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir);
        store
            .append(&JobRecord::success("Gone", "Gone.mp3", 1.0))
            .unwrap();
        let manager = JobManager::new(
            Arc::new(MockMediaExtractor::new()),
            store.clone(),
            dir.path(),
            1,
        );

        assert_eq!(
            manager.delete("Gone.mp3").unwrap(),
            DeleteOutcome::NotFound("Gone.mp3".to_string())
        );
        assert!(store.find_by_file("Gone.mp3").unwrap().is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_delete_failure_leaves_record() {
        // procfs entries are regular files that cannot be unlinked, even by root.
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(&dir);
        store
            .append(&JobRecord::success("Status", "status", 1.0))
            .unwrap();
        let manager = JobManager::new(
            Arc::new(MockMediaExtractor::new()),
            store.clone(),
            "/proc/self",
            1,
        );

        let err = assert_err!(manager.delete("status"));
        assert!(matches!(err, JobError::DeletionFailure { ref file, .. } if file == "status"));
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.find_by_file("status").unwrap().is_some());
    }

    #[test]
    fn test_delete_file_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_song(dir.path(), "Orphan.mp3");
        let manager = JobManager::new(
            Arc::new(MockMediaExtractor::new()),
            json_store(&dir),
            dir.path(),
            1,
        );

        let outcome = manager.delete("Orphan.mp3").unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome::Deleted {
                file: "Orphan.mp3".to_string(),
                record: None
            }
        );
        assert!(!audio.path.exists());
    }

    #[test]
    fn test_delete_rejects_traversal() {
        let outer = tempfile::tempdir().unwrap();
        let downloads = outer.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"keep").unwrap();

        let manager = JobManager::new(
            Arc::new(MockMediaExtractor::new()),
            json_store(&outer),
            &downloads,
            1,
        );

        assert!(matches!(
            manager.delete("..%2Fsecret.txt").unwrap(),
            DeleteOutcome::NotFound(_)
        ));
        assert!(outer.path().join("secret.txt").exists());
    }

    #[test]
    fn test_resolve_download() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_song(dir.path(), "Song.mp3");
        let manager = JobManager::new(
            Arc::new(MockMediaExtractor::new()),
            json_store(&dir),
            dir.path(),
            1,
        );

        assert_eq!(manager.resolve_download("Song.mp3").unwrap(), audio.path);
        assert!(matches!(
            manager.resolve_download("missing.mp3"),
            Err(JobError::FileNotFound(_))
        ));
        assert!(manager.resolve_download("../Song.mp3").is_err());
    }
}
