//! Durable per-content processing state.
//!
//! One row per distinct file content, keyed by the content hash. Rows
//! only change through full-record upserts, so a replay with the same id
//! overwrites rather than duplicates.

mod schema;

use anyhow::Result;
use rusqlite::Connection;
use std::path::PathBuf;

pub use schema::SCHEMA;

/// Processing status lifecycle for a media record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processed,
    Error,
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Processed => "PROCESSED",
            Status::Error => "ERROR",
            Status::Skipped => "SKIPPED",
        }
    }

    /// Unrecognized text maps to `Pending`, which the dedup filter treats
    /// the same way: eligible for processing.
    pub fn parse(s: &str) -> Status {
        match s {
            "PROCESSED" => Status::Processed,
            "ERROR" => Status::Error,
            "SKIPPED" => Status::Skipped,
            _ => Status::Pending,
        }
    }
}

/// One row of the media table. Upserts always write the full record;
/// fields left as `None` are stored as NULL, never merged with prior
/// values.
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    /// Content hash, doubles as the primary key.
    pub id: String,
    pub content_hash: String,
    pub original_path: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    /// Wall-clock time the record was written (ISO 8601).
    pub capture_timestamp: Option<String>,
    pub category: Option<String>,
    pub detection_confidence: Option<f64>,
    /// JSON string `[x, y, w, h]`, normalized to image dimensions.
    pub detection_bbox: Option<String>,
    pub caption: Option<String>,
    pub species_label: Option<String>,
    pub species_scientific: Option<String>,
    pub species_confidence: Option<f64>,
    pub status: Status,
    pub error_message: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ProcessingRecord {
    /// Skeleton record carrying only provenance; callers fill in stage
    /// outputs before upserting.
    pub fn new(hash: &str, original_path: &str, file_name: &str) -> Self {
        Self {
            id: hash.to_string(),
            content_hash: hash.to_string(),
            original_path: original_path.to_string(),
            file_name: file_name.to_string(),
            file_size: None,
            capture_timestamp: None,
            category: None,
            detection_confidence: None,
            detection_bbox: None,
            caption: None,
            species_label: None,
            species_scientific: None,
            species_confidence: None,
            status: Status::Pending,
            error_message: None,
            created_at: None,
            updated_at: None,
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database file, creating parent directories as needed.
    /// WAL mode keeps concurrent readers (the dashboard) working during
    /// writer commits.
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Idempotent schema creation; safe to call on every startup.
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert-or-update keyed by id. `updated_at` is refreshed on every
    /// write; `created_at` keeps its insert-time value.
    pub fn upsert(&self, record: &ProcessingRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO media (
                id, content_hash, original_path, file_name, file_size,
                capture_timestamp,
                category, detection_confidence, detection_bbox,
                caption,
                species_label, species_scientific, species_confidence,
                status, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                content_hash = excluded.content_hash,
                original_path = excluded.original_path,
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                capture_timestamp = excluded.capture_timestamp,
                category = excluded.category,
                detection_confidence = excluded.detection_confidence,
                detection_bbox = excluded.detection_bbox,
                caption = excluded.caption,
                species_label = excluded.species_label,
                species_scientific = excluded.species_scientific,
                species_confidence = excluded.species_confidence,
                status = excluded.status,
                error_message = excluded.error_message,
                updated_at = CURRENT_TIMESTAMP
            "#,
            rusqlite::params![
                record.id,
                record.content_hash,
                record.original_path,
                record.file_name,
                record.file_size,
                record.capture_timestamp,
                record.category,
                record.detection_confidence,
                record.detection_bbox,
                record.caption,
                record.species_label,
                record.species_scientific,
                record.species_confidence,
                record.status.as_str(),
                record.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn get_by_hash(&self, hash: &str) -> Result<Option<ProcessingRecord>> {
        let result = self.conn.query_row(
            r#"
            SELECT id, content_hash, original_path, file_name, file_size,
                   capture_timestamp,
                   category, detection_confidence, detection_bbox,
                   caption,
                   species_label, species_scientific, species_confidence,
                   status, error_message,
                   created_at, updated_at
            FROM media
            WHERE content_hash = ?
            "#,
            [hash],
            Self::row_to_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_pending(&self, limit: usize) -> Result<Vec<ProcessingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, content_hash, original_path, file_name, file_size,
                   capture_timestamp,
                   category, detection_confidence, detection_bbox,
                   caption,
                   species_label, species_scientific, species_confidence,
                   status, error_message,
                   created_at, updated_at
            FROM media
            WHERE status = 'PENDING'
            LIMIT ?
            "#,
        )?;
        let records = stmt
            .query_map([limit as i64], Self::row_to_record)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    pub fn count_by_status(&self, status: Status) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM media WHERE status = ?",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessingRecord> {
        Ok(ProcessingRecord {
            id: row.get(0)?,
            content_hash: row.get(1)?,
            original_path: row.get(2)?,
            file_name: row.get(3)?,
            file_size: row.get(4)?,
            capture_timestamp: row.get(5)?,
            category: row.get(6)?,
            detection_confidence: row.get(7)?,
            detection_bbox: row.get(8)?,
            caption: row.get(9)?,
            species_label: row.get(10)?,
            species_scientific: row.get(11)?,
            species_confidence: row.get(12)?,
            status: Status::parse(&row.get::<_, String>(13)?),
            error_message: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_db(dir: &tempfile::TempDir) -> Database {
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_upsert_then_get_roundtrip() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);

        let mut record = ProcessingRecord::new("abc123", "/cam/IMG_0001.jpg", "IMG_0001.jpg");
        record.file_size = Some(2048);
        record.category = Some("animal".to_string());
        record.detection_confidence = Some(0.91);
        record.detection_bbox = Some("[0.1,0.2,0.3,0.4]".to_string());
        record.status = Status::Processed;
        db.upsert(&record).unwrap();

        let fetched = db.get_by_hash("abc123").unwrap().unwrap();
        assert_eq!(fetched.id, "abc123");
        assert_eq!(fetched.category.as_deref(), Some("animal"));
        assert_eq!(fetched.detection_bbox.as_deref(), Some("[0.1,0.2,0.3,0.4]"));
        assert_eq!(fetched.status, Status::Processed);
        assert!(fetched.created_at.is_some());
    }

    #[test]
    fn test_upsert_same_id_overwrites_instead_of_duplicating() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);

        let mut record = ProcessingRecord::new("h1", "/cam/a.jpg", "a.jpg");
        record.status = Status::Error;
        record.error_message = Some("detector exploded".to_string());
        db.upsert(&record).unwrap();

        record.status = Status::Processed;
        record.error_message = None;
        record.category = Some("empty".to_string());
        db.upsert(&record).unwrap();

        assert_eq!(db.count_by_status(Status::Processed).unwrap(), 1);
        assert_eq!(db.count_by_status(Status::Error).unwrap(), 0);

        let fetched = db.get_by_hash("h1").unwrap().unwrap();
        assert_eq!(fetched.status, Status::Processed);
        // Full-record upsert: fields omitted the second time go to NULL
        assert!(fetched.error_message.is_none());
    }

    #[test]
    fn test_get_by_hash_absent() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        assert!(db.get_by_hash("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_pending_respects_limit() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);

        for i in 0..5 {
            let record = ProcessingRecord::new(&format!("h{}", i), "/cam/x.jpg", "x.jpg");
            db.upsert(&record).unwrap();
        }

        let pending = db.list_pending(3).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.iter().all(|r| r.status == Status::Pending));
    }

    #[test]
    fn test_status_parse_unknown_is_pending() {
        assert_eq!(Status::parse("PROCESSED"), Status::Processed);
        assert_eq!(Status::parse("weird"), Status::Pending);
    }
}
