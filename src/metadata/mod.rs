//! Metadata embedding via exiftool.
//!
//! Tags are written either in place (standard raster formats) or into an
//! `.xmp` sidecar next to the copy (raw formats whose container cannot be
//! rewritten safely). Embedding is best-effort decoration over the
//! archive copy; the durable processing state lives in the database.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::cascade::AnalysisResult;

/// Agent marker added to every keyword set.
const AGENT_KEYWORD: &str = "Trailkeeper AI";
const CREATOR_TOOL: &str = "Trailkeeper v0.1";

pub struct MetadataWriter {
    exiftool: Option<PathBuf>,
}

impl MetadataWriter {
    /// Resolve the exiftool binary once. When it cannot be found the
    /// writer stays constructed but unavailable, and every write becomes
    /// a logged no-op.
    pub fn new(exiftool: &str) -> Self {
        let exiftool = match which::which(exiftool) {
            Ok(path) => {
                info!(exiftool = %path.display(), "Metadata writer ready");
                Some(path)
            }
            Err(e) => {
                warn!(binary = exiftool, error = %e, "exiftool not found, metadata embedding disabled");
                None
            }
        };
        Self { exiftool }
    }

    pub fn available(&self) -> bool {
        self.exiftool.is_some()
    }

    /// Embed the analysis result into `file_path`, or into a sidecar
    /// `.xmp` next to it when `sidecar` is set.
    pub fn write(&self, file_path: &Path, result: &AnalysisResult, sidecar: bool) -> Result<()> {
        let Some(exiftool) = &self.exiftool else {
            debug!(path = %file_path.display(), "Skipping metadata embedding, exiftool unavailable");
            return Ok(());
        };

        let target = if sidecar {
            let target = file_path.with_extension("xmp");
            debug!(sidecar = %target.display(), "Writing XMP sidecar");
            target
        } else {
            if !file_path.exists() {
                return Err(anyhow!("Target file not found: {}", file_path.display()));
            }
            file_path.to_path_buf()
        };

        let mut cmd = Command::new(exiftool);
        // No *_original backup: we only ever tag the archive copy.
        // -P preserves the file modification time.
        cmd.arg("-overwrite_original").arg("-P");

        for keyword in self.keywords(result) {
            cmd.arg(format!("-XMP:Subject+={}", keyword));
            cmd.arg(format!("-IPTC:Keywords+={}", keyword));
        }

        if let Some(caption) = &result.caption {
            cmd.arg(format!("-XMP:Description={}", caption));
            cmd.arg(format!("-EXIF:ImageDescription={}", caption));
            cmd.arg(format!("-IPTC:Caption-Abstract={}", caption));
        }

        cmd.arg(format!("-XMP:CreatorTool={}", CREATOR_TOOL));
        cmd.arg(&target);

        let output = cmd.output()?;

        if output.status.success() {
            debug!(path = %target.display(), "Metadata written");
            Ok(())
        } else {
            Err(anyhow!(
                "exiftool failed for {}: {}",
                target.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    /// Accumulated keyword set: category, species label, agent marker.
    fn keywords(&self, result: &AnalysisResult) -> Vec<String> {
        let mut keywords = vec![result.category.as_str().to_string()];
        if let Some(species) = &result.species {
            if !keywords.contains(&species.common) {
                keywords.push(species.common.clone());
            }
            if species.scientific != species.common {
                keywords.push(species.scientific.clone());
            }
        }
        keywords.push(AGENT_KEYWORD.to_string());
        keywords
    }
}

/// Raw formats get a sidecar instead of in-place embedding.
pub fn is_raw_format(path: &Path) -> bool {
    matches!(
        extension_of(path).as_deref(),
        Some("arw" | "cr2" | "dng" | "nef" | "orf" | "rw2")
    )
}

/// Standard raster formats take in-place embedding.
pub fn is_embeddable_format(path: &Path) -> bool {
    matches!(
        extension_of(path).as_deref(),
        Some("jpg" | "jpeg" | "png" | "tiff")
    )
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}
