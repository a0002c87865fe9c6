//! SQLite metadata backend — the `songs` table.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    page_offset, total_pages, JobRecord, JobStatus, MetadataStore, Page, StoreError, PAGE_SIZE,
};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS songs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id     TEXT NOT NULL,
    title      TEXT NOT NULL,
    file       TEXT NOT NULL,
    size       REAL NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_songs_file ON songs(file);";

const COLUMNS: &str = "job_id, title, file, size, status, created_at";

/// Single-connection SQLite store; access is serialized through a `Mutex`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Opens an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }
}

/// Raw column values of one `songs` row.
struct SongRow {
    job_id: String,
    title: String,
    file: String,
    size: f64,
    status: String,
    created_at: Option<String>,
}

impl SongRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            title: row.get("title")?,
            file: row.get("file")?,
            size: row.get("size")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_record(self) -> Result<JobRecord, StoreError> {
        let id = Uuid::parse_str(&self.job_id)
            .map_err(|e| StoreError::Corrupt(format!("job_id '{}': {}", self.job_id, e)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("status '{}'", self.status)))?;
        let created_at = self
            .created_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| StoreError::Corrupt(format!("created_at '{}': {}", s, e)))
            })
            .transpose()?;

        Ok(JobRecord {
            id,
            title: self.title,
            file: self.file,
            size: self.size,
            status,
            created_at,
        })
    }
}

impl MetadataStore for SqliteStore {
    fn append(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO songs (job_id, title, file, size, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.title,
                    record.file,
                    record.size,
                    record.status.as_str(),
                    record.created_at.map(|dt| dt.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
    }

    fn page(&self, page: usize) -> Result<Page, StoreError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM songs", [], |r| r.get(0))?;
            let total = total as usize;

            let records = match page_offset(page).filter(|offset| *offset < total) {
                Some(offset) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM songs ORDER BY id LIMIT ?1 OFFSET ?2",
                        COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![PAGE_SIZE as i64, offset as i64], SongRow::from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.into_iter()
                        .map(SongRow::into_record)
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => Vec::new(),
            };

            Ok(Page {
                records,
                page,
                total_pages: total_pages(total),
                total,
            })
        })
    }

    fn find_by_file(&self, file: &str) -> Result<Option<JobRecord>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM songs WHERE file = ?1 ORDER BY id LIMIT 1",
                        COLUMNS
                    ),
                    params![file],
                    SongRow::from_row,
                )
                .optional()?;
            row.map(SongRow::into_record).transpose()
        })
    }

    fn remove_by_file(&self, file: &str) -> Result<Option<JobRecord>, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let found = tx
                .query_row(
                    &format!(
                        "SELECT id, {} FROM songs WHERE file = ?1 ORDER BY id LIMIT 1",
                        COLUMNS
                    ),
                    params![file],
                    |row| Ok((row.get::<_, i64>("id")?, SongRow::from_row(row)?)),
                )
                .optional()?;

            let Some((rowid, song)) = found else {
                return Ok(None);
            };

            tx.execute("DELETE FROM songs WHERE id = ?1", params![rowid])?;
            tx.commit()?;
            song.into_record().map(Some)
        })
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM songs", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
