//! Tiered inference cascade: detect, then conditionally describe, then
//! conditionally classify.
//!
//! Each stage is a capability trait so a stub can replace the real model.
//! Capabilities are resolved once at construction; a missing describer or
//! classifier simply disables its stage. Stage failures after detection
//! degrade their fields to null instead of aborting the cascade.

pub mod classifier;
pub mod describer;
pub mod detector;
pub mod species;

use anyhow::Result;
use image::GenericImageView;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Config;

pub use classifier::{Classifier, OnnxSpeciesClassifier, SpeciesPrediction};
pub use describer::{Describer, VisionLlmDescriber};
pub use detector::{BBox, Category, Detection, Detector, OnnxDetector};

/// Merged result of all cascade stages for one image.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub category: Category,
    pub confidence: f32,
    pub bbox: Option<BBox>,
    pub caption: Option<String>,
    pub species: Option<SpeciesPrediction>,
}

/// Symmetric padding margin applied to the detection box before cropping:
/// 5% of the larger box side.
const CROP_PADDING_RATIO: f32 = 0.05;

/// Compute the pixel crop region for a normalized bbox, expanded by the
/// padding margin and clamped to image bounds. Returns `(x, y, w, h)` in
/// pixels, or `None` when the padded region is degenerate.
pub fn padded_crop_region(bbox: &BBox, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
    let box_w = bbox.w * img_w as f32;
    let box_h = bbox.h * img_h as f32;
    let pad = CROP_PADDING_RATIO * box_w.max(box_h);

    let left = (bbox.x * img_w as f32 - pad).max(0.0);
    let top = (bbox.y * img_h as f32 - pad).max(0.0);
    let right = ((bbox.x + bbox.w) * img_w as f32 + pad).min(img_w as f32);
    let bottom = ((bbox.y + bbox.h) * img_h as f32 + pad).min(img_h as f32);

    if left >= right || top >= bottom {
        return None;
    }

    Some((
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}

pub struct Cascade {
    detector: Box<dyn Detector>,
    describer: Option<Box<dyn Describer>>,
    classifier: Option<Box<dyn Classifier>>,
}

impl Cascade {
    pub fn new(
        detector: Box<dyn Detector>,
        describer: Option<Box<dyn Describer>>,
        classifier: Option<Box<dyn Classifier>>,
    ) -> Self {
        Self {
            detector,
            describer,
            classifier,
        }
    }

    /// Wire up the real providers from config. The detector is mandatory;
    /// describer and classifier stay disabled when not configured or when
    /// their model fails to load.
    pub fn from_config(config: &Config) -> Result<Self> {
        let detector: Box<dyn Detector> = Box::new(OnnxDetector::load(
            &config.detector.model_path,
            config.detector.confidence_threshold,
        )?);
        info!(model = %config.detector.model_path.display(), "Detector loaded");

        let describer: Option<Box<dyn Describer>> = if config.describer.enabled {
            info!(endpoint = %config.describer.endpoint, "Describer enabled");
            Some(Box::new(VisionLlmDescriber::new(
                &config.describer.endpoint,
                &config.describer.model,
                config.describer.api_key.as_deref(),
            )))
        } else {
            None
        };

        let classifier: Option<Box<dyn Classifier>> = match &config.classifier.model_path {
            Some(path) => match OnnxSpeciesClassifier::load(path) {
                Ok(c) => {
                    info!(model = %path.display(), "Species classifier loaded");
                    Some(Box::new(c))
                }
                Err(e) => {
                    warn!(model = %path.display(), error = %e, "Species classifier unavailable");
                    None
                }
            },
            None => None,
        };

        Ok(Self::new(detector, describer, classifier))
    }

    /// Run the cascade over one image. A hard detector failure aborts
    /// with `Err`; everything after detection degrades gracefully.
    pub fn analyze(&self, image_path: &Path) -> Result<AnalysisResult> {
        let detection = self.detector.detect(image_path)?;

        let mut result = AnalysisResult {
            category: detection.category,
            confidence: detection.confidence,
            bbox: detection.bbox,
            caption: None,
            species: None,
        };

        // Describe only subjects worth narrating
        if matches!(result.category, Category::Animal | Category::Person) {
            if let Some(describer) = &self.describer {
                match describer.describe(image_path, result.category) {
                    Ok(caption) => result.caption = Some(caption),
                    Err(e) => {
                        warn!(path = %image_path.display(), provider = describer.name(), error = %e,
                              "Caption stage failed, continuing without caption");
                    }
                }
            }
        }

        // Classify only animals with a usable box
        if result.category == Category::Animal {
            if let Some(classifier) = &self.classifier {
                if let Some(bbox) = result.bbox.filter(|b| b.is_usable()) {
                    match self.classify_crop(image_path, &bbox, classifier.as_ref()) {
                        Ok(species) => result.species = species,
                        Err(e) => {
                            warn!(path = %image_path.display(), provider = classifier.name(), error = %e,
                                  "Classification stage failed, continuing without species");
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    fn classify_crop(
        &self,
        image_path: &Path,
        bbox: &BBox,
        classifier: &dyn Classifier,
    ) -> Result<Option<SpeciesPrediction>> {
        let img = image::open(image_path)?;
        let (width, height) = img.dimensions();

        let Some((x, y, w, h)) = padded_crop_region(bbox, width, height) else {
            debug!(path = %image_path.display(), "Degenerate crop region, skipping classification");
            return Ok(None);
        };

        let crop = img.crop_imm(x, y, w, h);
        classifier.classify(&crop).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubDetector {
        detection: Detection,
        calls: Arc<AtomicUsize>,
    }

    impl Detector for StubDetector {
        fn detect(&self, _image_path: &Path) -> Result<Detection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detection.clone())
        }

        fn name(&self) -> &'static str {
            "stub-detector"
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _image_path: &Path) -> Result<Detection> {
            Err(anyhow!("session died"))
        }

        fn name(&self) -> &'static str {
            "failing-detector"
        }
    }

    struct StubDescriber {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Describer for StubDescriber {
        fn describe(&self, _image_path: &Path, _category: Category) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("endpoint unreachable"))
            } else {
                Ok("a tapir crossing a stream".to_string())
            }
        }

        fn name(&self) -> &'static str {
            "stub-describer"
        }
    }

    struct StubClassifier {
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for StubClassifier {
        fn classify(&self, _crop: &image::DynamicImage) -> Result<SpeciesPrediction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SpeciesPrediction {
                scientific: "Tapirus terrestris".to_string(),
                common: "Lowland Tapir".to_string(),
                confidence: 0.8,
            })
        }

        fn name(&self) -> &'static str {
            "stub-classifier"
        }
    }

    fn write_test_image(dir: &tempfile::TempDir, name: &str, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([90, 110, 70]));
        img.save(&path).unwrap();
        path
    }

    fn cascade_with(
        detection: Detection,
        describer_calls: Arc<AtomicUsize>,
        classifier_calls: Arc<AtomicUsize>,
    ) -> Cascade {
        Cascade::new(
            Box::new(StubDetector {
                detection,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Some(Box::new(StubDescriber {
                calls: describer_calls,
                fail: false,
            })),
            Some(Box::new(StubClassifier {
                calls: classifier_calls,
            })),
        )
    }

    #[test]
    fn test_padded_crop_region_reference_values() {
        // 1000x1000 image, box spanning pixels 100-400 both axes;
        // 5% of the 300px side is 15px of padding each way.
        let bbox = BBox {
            x: 0.1,
            y: 0.1,
            w: 0.3,
            h: 0.3,
        };
        let (x, y, w, h) = padded_crop_region(&bbox, 1000, 1000).unwrap();
        assert_eq!((x, y), (85, 85));
        assert_eq!((x + w, y + h), (415, 415));
    }

    #[test]
    fn test_padded_crop_region_clamps_to_bounds() {
        let bbox = BBox {
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
        };
        let (x, y, w, h) = padded_crop_region(&bbox, 640, 480).unwrap();
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (640, 480));
    }

    #[test]
    fn test_padded_crop_region_degenerate() {
        let bbox = BBox {
            x: 0.5,
            y: 0.5,
            w: 0.0,
            h: 0.0,
        };
        assert!(padded_crop_region(&bbox, 1000, 1000).is_none());
    }

    #[test]
    fn test_empty_detection_short_circuits_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "empty.jpg", 64, 64);

        let describer_calls = Arc::new(AtomicUsize::new(0));
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let cascade = cascade_with(
            Detection::empty(),
            describer_calls.clone(),
            classifier_calls.clone(),
        );

        let result = cascade.analyze(&path).unwrap();
        assert_eq!(result.category, Category::Empty);
        assert!(result.caption.is_none());
        assert!(result.species.is_none());
        assert_eq!(describer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_animal_detection_runs_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "animal.jpg", 128, 128);

        let describer_calls = Arc::new(AtomicUsize::new(0));
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let cascade = cascade_with(
            Detection {
                category: Category::Animal,
                confidence: 0.92,
                bbox: Some(BBox {
                    x: 0.2,
                    y: 0.2,
                    w: 0.4,
                    h: 0.4,
                }),
            },
            describer_calls.clone(),
            classifier_calls.clone(),
        );

        let result = cascade.analyze(&path).unwrap();
        assert_eq!(result.category, Category::Animal);
        assert_eq!(result.caption.as_deref(), Some("a tapir crossing a stream"));
        let species = result.species.unwrap();
        assert_eq!(species.scientific, "Tapirus terrestris");
        assert_eq!(describer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_person_detection_describes_but_never_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "person.jpg", 128, 128);

        let describer_calls = Arc::new(AtomicUsize::new(0));
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let cascade = cascade_with(
            Detection {
                category: Category::Person,
                confidence: 0.88,
                bbox: Some(BBox {
                    x: 0.1,
                    y: 0.1,
                    w: 0.5,
                    h: 0.8,
                }),
            },
            describer_calls.clone(),
            classifier_calls.clone(),
        );

        let result = cascade.analyze(&path).unwrap();
        assert!(result.caption.is_some());
        assert!(result.species.is_none());
        assert_eq!(describer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_describer_failure_degrades_to_null_caption() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "animal.jpg", 128, 128);

        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let cascade = Cascade::new(
            Box::new(StubDetector {
                detection: Detection {
                    category: Category::Animal,
                    confidence: 0.9,
                    bbox: Some(BBox {
                        x: 0.25,
                        y: 0.25,
                        w: 0.5,
                        h: 0.5,
                    }),
                },
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Some(Box::new(StubDescriber {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            })),
            Some(Box::new(StubClassifier {
                calls: classifier_calls.clone(),
            })),
        );

        let result = cascade.analyze(&path).unwrap();
        assert!(result.caption.is_none());
        // Classification still ran despite the caption failure
        assert!(result.species.is_some());
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unusable_bbox_skips_classification() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "animal.jpg", 128, 128);

        let describer_calls = Arc::new(AtomicUsize::new(0));
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let cascade = cascade_with(
            Detection {
                category: Category::Animal,
                confidence: 0.7,
                bbox: Some(BBox {
                    x: 0.3,
                    y: 0.3,
                    w: 0.0,
                    h: 0.4,
                }),
            },
            describer_calls,
            classifier_calls.clone(),
        );

        let result = cascade.analyze(&path).unwrap();
        assert!(result.species.is_none());
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hard_detector_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "broken.jpg", 32, 32);

        let cascade = Cascade::new(Box::new(FailingDetector), None, None);
        assert!(cascade.analyze(&path).is_err());
    }

    #[test]
    fn test_error_category_yields_well_formed_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(&dir, "soft.jpg", 32, 32);

        let describer_calls = Arc::new(AtomicUsize::new(0));
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let cascade = cascade_with(
            Detection::error(),
            describer_calls.clone(),
            classifier_calls.clone(),
        );

        let result = cascade.analyze(&path).unwrap();
        assert_eq!(result.category, Category::Error);
        assert_eq!(result.confidence, 0.0);
        assert!(result.bbox.is_none());
        assert_eq!(describer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(classifier_calls.load(Ordering::SeqCst), 0);
    }
}
