//! Classification stage: species classifier over the cropped detection.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::Mutex;

use super::species::{split_label, SPECIES_VOCABULARY};

/// Top-scoring species for one crop.
#[derive(Debug, Clone)]
pub struct SpeciesPrediction {
    pub scientific: String,
    pub common: String,
    pub confidence: f32,
}

/// Classification capability over a fixed label vocabulary. Input is the
/// already-cropped detection region; failures degrade the species fields
/// to null without affecting the rest of the cascade.
pub trait Classifier: Send + Sync {
    fn classify(&self, crop: &DynamicImage) -> Result<SpeciesPrediction>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// ONNX image classifier whose output logits index into
/// [`SPECIES_VOCABULARY`].
pub struct OnnxSpeciesClassifier {
    session: Mutex<Session>,
}

const INPUT_SIZE: u32 = 224;
// ImageNet normalization, the usual export convention
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

impl OnnxSpeciesClassifier {
    pub fn load(model_path: &PathBuf) -> Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!(
                "Classifier model not found at {}",
                model_path.display()
            ));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Classifier for OnnxSpeciesClassifier {
    fn classify(&self, crop: &DynamicImage) -> Result<SpeciesPrediction> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock classifier session: {}", e))?;

        let resized = crop.resize_exact(
            INPUT_SIZE,
            INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for y in 0..INPUT_SIZE as usize {
            for x in 0..INPUT_SIZE as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                let idx = y * INPUT_SIZE as usize + x;
                for c in 0..3 {
                    input_data[c * plane + idx] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
                }
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;

        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        let output = outputs
            .iter()
            .next()
            .map(|(_, value)| value)
            .ok_or_else(|| anyhow!("Classifier produced no output"))?;

        let (_shape, logits) = output.try_extract_tensor::<f32>()?;

        if logits.len() != SPECIES_VOCABULARY.len() {
            return Err(anyhow!(
                "Classifier output size {} does not match vocabulary size {}",
                logits.len(),
                SPECIES_VOCABULARY.len()
            ));
        }

        let probabilities = softmax(logits);
        let (best_idx, best_prob) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| anyhow!("Empty classifier output"))?;

        let (scientific, common) = split_label(SPECIES_VOCABULARY[best_idx]);

        Ok(SpeciesPrediction {
            scientific,
            common,
            confidence: *best_prob,
        })
    }

    fn name(&self) -> &'static str {
        "onnx-species"
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&v| v / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_is_shift_invariant() {
        let a = softmax(&[0.0, 1.0]);
        let b = softmax(&[100.0, 101.0]);
        assert!((a[0] - b[0]).abs() < 1e-5);
        assert!((a[1] - b[1]).abs() < 1e-5);
    }
}
