//! Content-addressed dedup checkpoint.
//!
//! The SHA-256 of a file's bytes is the sole dedup key: identical bytes
//! under a different name or path are recognized as already handled, and
//! a byte-for-byte edit of a previously failed file gets a new hash and
//! is treated as brand new.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db::{Database, Status};

/// Compute the SHA-256 content fingerprint by streaming the file in
/// fixed-size chunks. Never loads the whole file into memory.
pub fn fingerprint(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Decide whether a candidate file needs (re)processing.
///
/// Returns `(process, hash)`. An unreadable file yields `(false, None)`:
/// it is excluded from this cycle rather than retried immediately. This
/// fails safe by skipping, so a file we cannot even hash never produces
/// a store write, and the next scan will see it again.
pub fn should_process(db: &Database, path: &Path) -> (bool, Option<String>) {
    let hash = match fingerprint(path) {
        Ok(h) => h,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Fingerprinting failed, excluding from this cycle");
            return (false, None);
        }
    };

    let existing = match db.get_by_hash(&hash) {
        Ok(record) => record,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Checkpoint lookup failed, excluding from this cycle");
            return (false, None);
        }
    };

    match existing {
        Some(record) => match record.status {
            Status::Processed => {
                debug!(path = %path.display(), "Skipping, already processed");
                (false, Some(hash))
            }
            Status::Error => {
                info!(path = %path.display(), "Retrying after previous error");
                (true, Some(hash))
            }
            // PENDING, SKIPPED, or anything unrecognized
            _ => (true, Some(hash)),
        },
        None => (true, Some(hash)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProcessingRecord;
    use tempfile::tempdir;

    fn open_test_db(dir: &tempfile::TempDir) -> Database {
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_fingerprint_is_content_only() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("original.jpg");
        let b = dir.path().join("renamed copy.jpg");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        let c = dir.path().join("edited.jpg");
        std::fs::write(&c, b"same bytes!").unwrap();
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&c).unwrap());
    }

    #[test]
    fn test_unseen_file_is_admitted() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        let file = dir.path().join("new.jpg");
        std::fs::write(&file, b"fresh content").unwrap();

        let (process, hash) = should_process(&db, &file);
        assert!(process);
        assert_eq!(hash.unwrap(), fingerprint(&file).unwrap());
    }

    #[test]
    fn test_processed_record_is_skipped_even_under_new_name() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        let file = dir.path().join("trap_0001.jpg");
        std::fs::write(&file, b"capybara at dusk").unwrap();
        let hash = fingerprint(&file).unwrap();

        let mut record = ProcessingRecord::new(&hash, "/elsewhere/other_name.jpg", "other_name.jpg");
        record.status = Status::Processed;
        db.upsert(&record).unwrap();

        let (process, got) = should_process(&db, &file);
        assert!(!process);
        assert_eq!(got.unwrap(), hash);
    }

    #[test]
    fn test_error_record_is_readmitted() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        let file = dir.path().join("trap_0002.jpg");
        std::fs::write(&file, b"blurry tapir").unwrap();
        let hash = fingerprint(&file).unwrap();

        let mut record = ProcessingRecord::new(&hash, file.to_str().unwrap(), "trap_0002.jpg");
        record.status = Status::Error;
        record.error_message = Some("inference timeout".to_string());
        db.upsert(&record).unwrap();

        let (process, got) = should_process(&db, &file);
        assert!(process);
        assert_eq!(got.unwrap(), hash);
    }

    #[test]
    fn test_pending_record_is_readmitted() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        let file = dir.path().join("trap_0003.jpg");
        std::fs::write(&file, b"half written row").unwrap();
        let hash = fingerprint(&file).unwrap();

        let record = ProcessingRecord::new(&hash, file.to_str().unwrap(), "trap_0003.jpg");
        db.upsert(&record).unwrap();

        let (process, _) = should_process(&db, &file);
        assert!(process);
    }

    #[test]
    fn test_unreadable_file_is_excluded_without_hash() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        let missing = dir.path().join("vanished.jpg");

        let (process, hash) = should_process(&db, &missing);
        assert!(!process);
        assert!(hash.is_none());
    }
}
