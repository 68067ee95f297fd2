//! Detection stage: MegaDetector-class ONNX model over one image.

use anyhow::{anyhow, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Closed label set produced by the detection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Animal,
    Person,
    Vehicle,
    Empty,
    /// The detector reported an error indicator instead of a detection.
    Error,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Animal => "animal",
            Category::Person => "person",
            Category::Vehicle => "vehicle",
            Category::Empty => "empty",
            Category::Error => "error",
        }
    }
}

/// Bounding box normalized to `[0, 1]` relative to image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    /// Usable downstream only with positive width and height.
    pub fn is_usable(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// Stored-string form: JSON `[x, y, w, h]`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&[self.x, self.y, self.w, self.h])
            .unwrap_or_else(|_| "[]".to_string())
    }
}

/// Single best detection for one image.
#[derive(Debug, Clone)]
pub struct Detection {
    pub category: Category,
    pub confidence: f32,
    pub bbox: Option<BBox>,
}

impl Detection {
    pub fn empty() -> Self {
        Self {
            category: Category::Empty,
            confidence: 0.0,
            bbox: None,
        }
    }

    /// Captured detection failure: well-formed result, nothing downstream.
    pub fn error() -> Self {
        Self {
            category: Category::Error,
            confidence: 0.0,
            bbox: None,
        }
    }
}

/// Detection capability. A hard `Err` (unreadable image, broken session)
/// aborts the whole cascade; a soft failure is returned as
/// `Detection::error()`.
pub trait Detector: Send + Sync {
    fn detect(&self, image_path: &Path) -> Result<Detection>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// ONNX detector (MegaDetector export). Keeps only the single
/// highest-confidence detection per image; ties are broken by the
/// model's output order (implementation-defined, first wins).
pub struct OnnxDetector {
    session: Mutex<Session>,
    confidence_threshold: f32,
}

const INPUT_SIZE: u32 = 640;

impl OnnxDetector {
    pub fn load(model_path: &PathBuf, confidence_threshold: f32) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!(
                "Detection model not found at {}",
                model_path.display()
            ));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        Ok(Self {
            session: Mutex::new(session),
            confidence_threshold,
        })
    }

    fn run_inference(&self, img: &image::DynamicImage) -> Result<Detection> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock detection session: {}", e))?;

        let resized = img.resize_exact(
            INPUT_SIZE,
            INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        // NCHW, scaled to [0, 1]
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for y in 0..INPUT_SIZE as usize {
            for x in 0..INPUT_SIZE as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                let idx = y * INPUT_SIZE as usize + x;
                input_data[idx] = pixel[0] as f32 / 255.0;
                input_data[plane + idx] = pixel[1] as f32 / 255.0;
                input_data[2 * plane + idx] = pixel[2] as f32 / 255.0;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;

        let outputs = session.run(ort::inputs!["images" => input_tensor])?;

        let output = match outputs.iter().next() {
            Some((_, value)) => value,
            // Model produced nothing usable: captured, not fatal
            None => return Ok(Detection::error()),
        };

        let (shape, data) = match output.try_extract_tensor::<f32>() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Detector output was not a float tensor, capturing as error");
                return Ok(Detection::error());
            }
        };

        // Rows of (x1, y1, x2, y2, confidence, class) in input-pixel space
        let cols = match shape.last() {
            Some(&c) if c >= 6 => c as usize,
            _ => {
                tracing::warn!(?shape, "Unexpected detector output shape, capturing as error");
                return Ok(Detection::error());
            }
        };
        let rows = data.len() / cols;

        let mut best: Option<(f32, usize, usize)> = None; // (confidence, row, class)
        for row in 0..rows {
            let confidence = data[row * cols + 4];
            if confidence < self.confidence_threshold {
                continue;
            }
            let class = data[row * cols + 5] as usize;
            // Strictly-greater keeps the first of any tie
            if best.map(|(c, _, _)| confidence > c).unwrap_or(true) {
                best = Some((confidence, row, class));
            }
        }

        let (confidence, row, class) = match best {
            Some(b) => b,
            None => return Ok(Detection::empty()),
        };

        let category = match class {
            0 => Category::Animal,
            1 => Category::Person,
            2 => Category::Vehicle,
            _ => Category::Empty,
        };

        if category == Category::Empty {
            return Ok(Detection::empty());
        }

        let x1 = data[row * cols] / INPUT_SIZE as f32;
        let y1 = data[row * cols + 1] / INPUT_SIZE as f32;
        let x2 = data[row * cols + 2] / INPUT_SIZE as f32;
        let y2 = data[row * cols + 3] / INPUT_SIZE as f32;

        let bbox = BBox {
            x: x1.clamp(0.0, 1.0),
            y: y1.clamp(0.0, 1.0),
            w: (x2 - x1).clamp(0.0, 1.0),
            h: (y2 - y1).clamp(0.0, 1.0),
        };

        Ok(Detection {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            bbox: Some(bbox),
        })
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, image_path: &Path) -> Result<Detection> {
        let img = image::open(image_path)
            .map_err(|e| anyhow!("Failed to load image {}: {}", image_path.display(), e))?;
        self.run_inference(&img)
    }

    fn name(&self) -> &'static str {
        "onnx-megadetector"
    }
}
