pub const SCHEMA: &str = r#"
-- Media table: one row per distinct file content, keyed by SHA-256
CREATE TABLE IF NOT EXISTS media (
    id TEXT PRIMARY KEY,
    content_hash TEXT UNIQUE,
    original_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER,

    -- Wall-clock time the record was written, not EXIF capture time
    capture_timestamp TEXT,

    -- Detection stage output
    category TEXT,              -- 'animal', 'person', 'vehicle', 'empty', 'error'
    detection_confidence REAL,
    detection_bbox TEXT,        -- JSON string [x, y, w, h], normalized

    -- Description stage output
    caption TEXT,

    -- Classification stage output
    species_label TEXT,
    species_scientific TEXT,
    species_confidence REAL,

    -- Processing status
    status TEXT DEFAULT 'PENDING',  -- 'PENDING', 'PROCESSED', 'ERROR', 'SKIPPED'
    error_message TEXT,

    -- Timestamps
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Indexes for dedup lookups and dashboard queries
CREATE INDEX IF NOT EXISTS idx_media_content_hash ON media(content_hash);
CREATE INDEX IF NOT EXISTS idx_media_status ON media(status);
CREATE INDEX IF NOT EXISTS idx_media_category ON media(category);
"#;
