use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub describer: DescriberConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Longer pause after a batch-level failure (seconds).
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    60
}

fn default_error_backoff() -> u64 {
    300
}

fn default_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "arw".to_string(),
        "cr2".to_string(),
        "mp4".to_string(),
        "avi".to_string(),
    ]
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
            extensions: default_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Path to the detection model (ONNX). A missing file means the
    /// detector capability is unavailable and ingestion refuses to start.
    #[serde(default = "default_detector_model")]
    pub model_path: PathBuf,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_detector_model() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("trailkeeper/models/megadetector.onnx")
}

fn default_confidence_threshold() -> f32 {
    0.1
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_detector_model(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriberConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_describer_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_describer_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_describer_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_describer_model() -> String {
    "gemma-3-4b".to_string()
}

impl Default for DescriberConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_describer_endpoint(),
            model: default_describer_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClassifierConfig {
    /// Path to the species classifier model (ONNX). None disables the
    /// classification stage.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// exiftool binary name or absolute path.
    #[serde(default = "default_exiftool")]
    pub exiftool: String,
}

fn default_exiftool() -> String {
    "exiftool".to_string()
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            exiftool: default_exiftool(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data/input")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("data/archive")
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trailkeeper")
        .join("trailkeeper.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            archive_dir: default_archive_dir(),
            db_path: default_db_path(),
            batch: BatchConfig::default(),
            detector: DetectorConfig::default(),
            describer: DescriberConfig::default(),
            classifier: ClassifierConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TRAILKEEPER_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trailkeeper")
            .join("config.toml")
    }
}
