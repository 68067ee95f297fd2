//! Batch ingestion orchestrator.
//!
//! Drives one cycle: scan the input directory, admit up to a batch of
//! not-yet-processed files via the content checkpoint, and for each
//! admitted file run the cascade, place the copy into the
//! category-partitioned archive, embed metadata, and upsert the durable
//! record. Failures are caught at file granularity; a file's failure
//! becomes an `ERROR` record under the same content hash so the next
//! scan retries it.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::cascade::{AnalysisResult, Cascade};
use crate::checkpoint;
use crate::config::Config;
use crate::db::{Database, ProcessingRecord, Status};
use crate::metadata::{is_embeddable_format, is_raw_format, MetadataWriter};

/// Placement failures worth distinguishing from plain I/O.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// A file sits where the category directory belongs and could not be
    /// moved aside.
    #[error("destination {0} exists as a file where a directory is expected")]
    ConflictingFile(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Counters for one `process_batch` cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSummary {
    pub candidates: usize,
    pub admitted: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct BatchProcessor {
    input_dir: PathBuf,
    archive_dir: PathBuf,
    extensions: Vec<String>,
    db: Database,
    cascade: Cascade,
    metadata: MetadataWriter,
}

impl BatchProcessor {
    pub fn new(
        input_dir: PathBuf,
        archive_dir: PathBuf,
        extensions: Vec<String>,
        db: Database,
        cascade: Cascade,
        metadata: MetadataWriter,
    ) -> Self {
        Self {
            input_dir,
            archive_dir,
            extensions,
            db,
            cascade,
            metadata,
        }
    }

    /// Wire up the full pipeline from config: database, real cascade
    /// providers, and the metadata writer.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db = Database::open(&config.db_path)
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
        db.initialize()?;

        let cascade = Cascade::from_config(config)?;
        let metadata = MetadataWriter::new(&config.metadata.exiftool);

        Ok(Self::new(
            config.input_dir.clone(),
            config.archive_dir.clone(),
            config.batch.extensions.clone(),
            db,
            cascade,
            metadata,
        ))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Recursive, read-only scan for supported files. Sorted by path so
    /// a given filesystem state always yields the same sequence.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.input_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension() {
                    let ext_lower = ext.to_string_lossy().to_lowercase();
                    if self.extensions.iter().any(|e| e.to_lowercase() == ext_lower) {
                        files.push(path.to_path_buf());
                    }
                }
            }
        }

        files.sort();

        Ok(files)
    }

    /// Run one ingestion cycle over at most `max_size` admitted files.
    /// Files the checkpoint skips do not count against the limit but are
    /// not revisited within this call.
    pub fn process_batch(&self, max_size: usize) -> Result<BatchSummary> {
        let candidates = self.scan()?;
        let mut summary = BatchSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        let mut pending: Vec<(PathBuf, String)> = Vec::new();
        for path in &candidates {
            let (process, hash) = checkpoint::should_process(&self.db, path);
            if process {
                // Admission always carries a real hash; hash failures are
                // excluded upstream and never reach a store write.
                if let Some(hash) = hash {
                    pending.push((path.clone(), hash));
                    if pending.len() >= max_size {
                        break;
                    }
                }
            }
        }

        summary.admitted = pending.len();

        if pending.is_empty() {
            info!(candidates = summary.candidates, "No files pending processing");
            return Ok(summary);
        }

        info!(
            admitted = pending.len(),
            candidates = summary.candidates,
            "Processing batch"
        );

        for (path, hash) in pending {
            match self.process_file(&path, &hash) {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(path = %path.display(), error = %e, "File processing failed");
                    // Database failures inside this upsert propagate to
                    // the batch loop; per-file handling cannot recover
                    // them anyway.
                    self.db.upsert(&Self::error_record(&path, &hash, &e))?;
                }
            }
        }

        info!(
            processed = summary.processed,
            failed = summary.failed,
            total_processed = self.db.count_by_status(Status::Processed).unwrap_or(-1),
            "Batch complete"
        );

        Ok(summary)
    }

    /// Cascade, placement, metadata, persistence for one admitted file.
    fn process_file(&self, path: &Path, hash: &str) -> Result<()> {
        info!(path = %path.display(), "Processing");

        let result = self.cascade.analyze(path)?;

        let dest_dir = self.archive_dir.join(result.category.as_str());
        ensure_category_dir(&dest_dir)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest_path = dest_dir.join(&file_name);

        // First writer wins; never overwrite an existing archive copy
        if !dest_path.exists() {
            std::fs::copy(path, &dest_path)
                .with_context(|| format!("Failed to copy into {}", dest_path.display()))?;
        }

        self.embed_metadata(&dest_path, &result);

        let file_size = std::fs::metadata(path).map(|m| m.len() as i64).ok();
        let mut record = ProcessingRecord::new(hash, &path.to_string_lossy(), &file_name);
        record.file_size = file_size;
        record.capture_timestamp = Some(Utc::now().to_rfc3339());
        record.category = Some(result.category.as_str().to_string());
        record.detection_confidence = Some(result.confidence as f64);
        record.detection_bbox = result.bbox.map(|b| b.to_json());
        record.caption = result.caption.clone();
        if let Some(species) = &result.species {
            record.species_label = Some(species.common.clone());
            record.species_scientific = Some(species.scientific.clone());
            record.species_confidence = Some(species.confidence as f64);
        }
        record.status = Status::Processed;

        self.db.upsert(&record)?;

        info!(path = %path.display(), category = result.category.as_str(), "Completed");
        Ok(())
    }

    /// Embedding mode by file type: raw formats get a sidecar, standard
    /// raster formats are tagged in place, everything else (video) has no
    /// metadata step. An embedding failure does not demote the record;
    /// the store row stays the source of truth and the failure is logged.
    fn embed_metadata(&self, dest_path: &Path, result: &AnalysisResult) {
        let outcome = if is_raw_format(dest_path) {
            self.metadata.write(dest_path, result, true)
        } else if is_embeddable_format(dest_path) {
            self.metadata.write(dest_path, result, false)
        } else {
            return;
        };

        if let Err(e) = outcome {
            warn!(path = %dest_path.display(), error = %e, "Metadata embedding failed, record stays PROCESSED");
        }
    }

    fn error_record(path: &Path, hash: &str, error: &anyhow::Error) -> ProcessingRecord {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut record = ProcessingRecord::new(hash, &path.to_string_lossy(), &file_name);
        record.capture_timestamp = Some(Utc::now().to_rfc3339());
        record.status = Status::Error;
        record.error_message = Some(error.to_string());
        record
    }
}

/// Defensive directory creation for NAS-style filesystems. A stray
/// regular file at the category path is renamed aside with a timestamp
/// suffix, never deleted. A creation race that leaves a directory in
/// place is tolerated.
pub fn ensure_category_dir(dest_dir: &Path) -> Result<(), PlacementError> {
    if dest_dir.exists() {
        if dest_dir.is_file() {
            let backup = backup_path(dest_dir);
            warn!(path = %dest_dir.display(), backup = %backup.display(),
                  "Category path exists as a file, renaming aside");
            std::fs::rename(dest_dir, &backup)?;
            std::fs::create_dir_all(dest_dir)?;
        }
        return Ok(());
    }

    match std::fs::create_dir_all(dest_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Concurrent creator got there first; only a file is a
            // genuine conflict
            if dest_dir.is_file() {
                Err(PlacementError::ConflictingFile(dest_dir.to_path_buf()))
            } else {
                Ok(())
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.backup-{}", name, stamp))
}
