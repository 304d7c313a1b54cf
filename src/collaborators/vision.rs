//! Google Cloud Vision text recognizer (`images:annotate`, DOCUMENT_TEXT_DETECTION).

use super::recognizer::{RecognitionError, TextBlock, TextDetection, TextRecognizer};
use crate::geometry::Point;
use crate::pipeline::encode;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Recognizer backed by the Cloud Vision REST API.
#[derive(Debug, Clone)]
pub struct CloudVisionRecognizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    jpeg_quality: u8,
}

impl CloudVisionRecognizer {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RecognitionError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            jpeg_quality: 90,
        })
    }

    /// Read the key from `GOOGLE_VISION_API_KEY`. `None` when unset or empty.
    pub fn from_env() -> Option<Result<Self, RecognitionError>> {
        std::env::var("GOOGLE_VISION_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(Self::new)
    }

    /// Point at a different endpoint (proxy, emulator).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TextRecognizer for CloudVisionRecognizer {
    async fn detect_text(&self, page: &DynamicImage) -> Result<TextDetection, RecognitionError> {
        let img = page.clone();
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode::jpeg_bytes(&img, quality))
            .await
            .map_err(|e| RecognitionError::Encode(e.to_string()))?
            .map_err(|e| RecognitionError::Encode(e.to_string()))?;

        let body = json!({
            "requests": [{
                "image": { "content": STANDARD.encode(&jpeg) },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
            }]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| RecognitionError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Response(e.to_string()))?;
        let detection = parse_annotation(parsed)?;
        debug!(
            "Cloud Vision: {} chars, {} blocks",
            detection.text.chars().count(),
            detection.blocks.len()
        );
        Ok(detection)
    }

    fn name(&self) -> &str {
        "cloud-vision"
    }
}

// ── Response model ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<AnnotatedPage>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedPage {
    #[serde(default)]
    blocks: Vec<AnnotatedBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotatedBlock {
    bounding_box: Option<BoundingPoly>,
    #[serde(default)]
    paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    symbols: Vec<Symbol>,
}

#[derive(Debug, Deserialize)]
struct Symbol {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

/// Cloud Vision omits zero coordinates.
#[derive(Debug, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: i64,
    #[serde(default)]
    y: i64,
}

fn parse_annotation(parsed: AnnotateResponse) -> Result<TextDetection, RecognitionError> {
    let Some(first) = parsed.responses.into_iter().next() else {
        return Ok(TextDetection::empty());
    };
    if let Some(err) = first.error {
        if !err.message.is_empty() {
            return Err(RecognitionError::Response(err.message));
        }
    }
    let Some(annotation) = first.full_text_annotation else {
        return Ok(TextDetection::empty());
    };

    let blocks = annotation
        .pages
        .into_iter()
        .flat_map(|p| p.blocks)
        .map(|b| {
            let text = b
                .paragraphs
                .iter()
                .map(|p| {
                    p.words
                        .iter()
                        .map(|w| w.symbols.iter().map(|s| s.text.as_str()).collect::<String>())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
                .join("\n");
            let vertices = b
                .bounding_box
                .map(|bb| {
                    bb.vertices
                        .into_iter()
                        .map(|v| Point::new(v.x as f32, v.y as f32))
                        .collect()
                })
                .unwrap_or_default();
            TextBlock { text, vertices }
        })
        .collect();

    Ok(TextDetection {
        text: annotation.text,
        blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blocks_and_defaults_missing_coordinates() {
        let raw = r#"{
          "responses": [{
            "fullTextAnnotation": {
              "text": "PASSPORT\nIVAN PETROV\n",
              "pages": [{
                "blocks": [{
                  "boundingBox": { "vertices": [{}, {"x": 120}, {"x": 120, "y": 30}, {"y": 30}] },
                  "paragraphs": [{ "words": [
                    { "symbols": [{"text": "P"}, {"text": "A"}, {"text": "S"}, {"text": "S"}] }
                  ]}]
                }]
              }]
            }
          }]
        }"#;
        let parsed: AnnotateResponse = serde_json::from_str(raw).unwrap();
        let detection = parse_annotation(parsed).unwrap();
        assert!(detection.text.starts_with("PASSPORT"));
        assert_eq!(detection.blocks.len(), 1);
        assert_eq!(detection.blocks[0].text, "PASS");
        assert_eq!(detection.blocks[0].vertices[0], Point::new(0.0, 0.0));
        assert_eq!(detection.blocks[0].vertices[2], Point::new(120.0, 30.0));
    }

    #[test]
    fn empty_response_is_empty_detection() {
        let parsed: AnnotateResponse = serde_json::from_str(r#"{"responses":[{}]}"#).unwrap();
        assert!(parse_annotation(parsed).unwrap().is_empty());
    }

    #[test]
    fn api_error_is_reported() {
        let parsed: AnnotateResponse =
            serde_json::from_str(r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#)
                .unwrap();
        let err = parse_annotation(parsed).unwrap_err();
        assert!(err.to_string().contains("Bad image data"));
    }
}
