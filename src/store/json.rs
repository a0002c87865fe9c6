//! JSON-file metadata backend.
//!
//! The whole collection is kept in memory and the file is rewritten after
//! every mutation. The rewrite goes through a temp file in the same
//! directory followed by a rename, so readers never see a torn file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{paginate, JobRecord, MetadataStore, Page, StoreError};

pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Vec<JobRecord>>,
}

impl JsonFileStore {
    /// Load the metadata file, or start empty when it does not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records = if path.exists() {
            let raw = fs_err::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<Vec<JobRecord>>(&raw)?
            }
        } else {
            Vec::new()
        };

        tracing::debug!(
            "Loaded {} record(s) from {}",
            records.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, records: &[JobRecord]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs_err::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let content = serde_json::to_vec_pretty(records)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tmp.write_all(&content)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        Ok(())
    }

    /// Apply a mutation and persist it; memory is left untouched if the save fails.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<JobRecord>) -> T,
    ) -> Result<T, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut next = records.clone();
        let out = f(&mut next);
        self.save(&next)?;
        *records = next;
        Ok(out)
    }
}

impl MetadataStore for JsonFileStore {
    fn append(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.mutate(|records| records.push(record.clone()))
    }

    fn page(&self, page: usize) -> Result<Page, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(paginate(&records, page))
    }

    fn find_by_file(&self, file: &str) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.iter().find(|r| r.file == file).cloned())
    }

    fn remove_by_file(&self, file: &str) -> Result<Option<JobRecord>, StoreError> {
        {
            let records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
            if !records.iter().any(|r| r.file == file) {
                return Ok(None);
            }
        }

        self.mutate(|records| {
            records
                .iter()
                .position(|r| r.file == file)
                .map(|idx| records.remove(idx))
        })
    }

    fn len(&self) -> Result<usize, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.len())
    }

    fn backend_name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobStatus;

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(&dir.path().join("songs_metadata.json")).unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_append_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs_metadata.json");
        let store = JsonFileStore::open(&path).unwrap();

        store
            .append(&JobRecord::success("My Song", "My Song.mp3", 3.5))
            .unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let page = reopened.page(1).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].file, "My Song.mp3");
        assert_eq!(page.records[0].status, JobStatus::Success);
    }

    #[test]
    fn test_reads_legacy_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs_metadata.json");
        std::fs::write(
            &path,
            r#"[{"title": "A", "file": "A.mp3", "size": 1.5, "status": "Success"},
                {"title": "B", "file": "B.mp3", "size": 2.0, "status": "Success"}]"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.find_by_file("B.mp3").unwrap().unwrap().title, "B");
    }

    #[test]
    fn test_remove_only_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs_metadata.json");
        let store = JsonFileStore::open(&path).unwrap();

        let first = JobRecord::success("Dup", "Dup.mp3", 1.0);
        let second = JobRecord::success("Dup", "Dup.mp3", 2.0);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let removed = store.remove_by_file("Dup.mp3").unwrap().unwrap();
        assert_eq!(removed.id, first.id);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(JsonFileStore::open(&path).unwrap().len().unwrap(), 1);

        assert!(store.remove_by_file("Other.mp3").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs_metadata.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json(_))));
    }
}
