//! Description stage: free-text caption from a vision LLM.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

use super::detector::Category;

/// Description capability. Failures are caught by the cascade and yield
/// a null caption.
pub trait Describer: Send + Sync {
    /// Describe the whole image; `category` is a hint from the detection
    /// stage.
    fn describe(&self, image_path: &Path, category: Category) -> Result<String>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Captioner backed by an OpenAI-compatible chat endpoint (LM Studio,
/// Ollama's compatibility layer, or the hosted APIs).
pub struct VisionLlmDescriber {
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl VisionLlmDescriber {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
        }
    }

    fn prompt(category: Category) -> String {
        format!(
            "This is a camera-trap photo whose main subject was detected as '{}'. \
             Describe the scene in 1-2 factual sentences: the subject, its posture \
             or activity, and the visible habitat. Do not speculate beyond what is \
             visible.",
            category.as_str()
        )
    }
}

impl Describer for VisionLlmDescriber {
    fn describe(&self, image_path: &Path, category: Category) -> Result<String> {
        let (base64_image, mime_type) = load_and_encode_image(image_path, 1024)?;
        let data_url = format!("data:{};base64,{}", mime_type, base64_image);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: Self::prompt(category),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 300,
            temperature: 0.4,
        };

        let url = format!("{}/chat/completions", self.endpoint);

        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(120))
            .build();

        let mut req = agent.post(&url).set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req
            .send_json(&request)
            .map_err(|e| anyhow!("Caption request failed: {}", e))?;

        let chat_response: ChatResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse caption response: {}", e))?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("No caption in response"))
    }

    fn name(&self) -> &'static str {
        "vision-llm"
    }
}

/// Load an image, resize if either dimension exceeds `max_dimension`,
/// re-encode as JPEG, and return the base64 string along with the MIME
/// type.
fn load_and_encode_image(image_path: &Path, max_dimension: u32) -> Result<(String, &'static str)> {
    let img = image::open(image_path)
        .map_err(|e| anyhow!("Failed to open image {}: {}", image_path.display(), e))?;

    let (width, height) = img.dimensions();
    let img = if width > max_dimension || height > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, 85);
    img.write_with_encoder(encoder)
        .map_err(|e| anyhow!("Failed to encode image as JPEG: {}", e))?;

    let base64_image = BASE64.encode(buf.into_inner());
    Ok((base64_image, "image/jpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_category_hint() {
        let prompt = VisionLlmDescriber::prompt(Category::Animal);
        assert!(prompt.contains("'animal'"));
    }
}
