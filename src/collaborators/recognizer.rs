//! Text recognition seam.

use crate::geometry::{Point, Rect};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text found on one page, plus the geometry of each block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextDetection {
    /// Full recognised text in reading order.
    pub text: String,
    /// Detected blocks, in the order the recognizer reported them.
    pub blocks: Vec<TextBlock>,
}

impl TextDetection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.blocks.is_empty()
    }
}

/// One block of text with its bounding polygon.
///
/// Vertices follow the reading direction of the text: the first edge runs
/// along the top of the first line, left to right as the text reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub vertices: Vec<Point>,
}

impl TextBlock {
    pub fn bounds(&self) -> Option<Rect> {
        Rect::bounding(&self.vertices)
    }
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("text recognition request failed: {0}")]
    Request(String),

    #[error("text recognition service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unreadable text recognition response: {0}")]
    Response(String),

    #[error("could not encode page for recognition: {0}")]
    Encode(String),
}

/// Detects text and text geometry on a page.
///
/// Errors are recoverable from the pipeline's point of view: a failed call is
/// treated as "no text found" and recorded as a degradation.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn detect_text(&self, page: &DynamicImage) -> Result<TextDetection, RecognitionError>;

    fn name(&self) -> &str {
        "recognizer"
    }
}

/// Recognizer for deployments without OCR. Always finds nothing.
///
/// With it the orientation stage keeps every page at 0°, cropping relies on
/// contours alone and classification always goes through the vision model.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecognizer;

#[async_trait]
impl TextRecognizer for NullRecognizer {
    async fn detect_text(&self, _page: &DynamicImage) -> Result<TextDetection, RecognitionError> {
        Ok(TextDetection::empty())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_recognizer_finds_nothing() {
        let page = DynamicImage::new_rgb8(8, 8);
        let detection = NullRecognizer.detect_text(&page).await.unwrap();
        assert!(detection.is_empty());
    }

    #[test]
    fn block_bounds() {
        let block = TextBlock {
            text: "Hi".into(),
            vertices: vec![
                Point::new(4.0, 2.0),
                Point::new(20.0, 2.0),
                Point::new(20.0, 9.0),
                Point::new(4.0, 9.0),
            ],
        };
        assert_eq!(block.bounds(), Some(Rect::new(4.0, 2.0, 20.0, 9.0)));
    }
}
