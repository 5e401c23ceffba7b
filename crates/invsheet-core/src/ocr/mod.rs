//! OCR over page images.

#[cfg(feature = "ocr")]
mod pure_engine;

#[cfg(feature = "ocr")]
pub use pure_engine::PureOcrEngine;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::OcrError;

/// A recognized line of text with its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBox {
    /// Quadrilateral corners (x1, y1, x2, y2, x3, y3, x4, y4).
    pub bbox: [f32; 8],

    /// Recognized text content.
    pub text: String,

    /// Recognition confidence score (0.0 - 1.0).
    pub confidence: f32,
}

impl TextBox {
    /// Get the axis-aligned bounding rectangle as (min_x, min_y, max_x, max_y).
    pub fn rect(&self) -> (f32, f32, f32, f32) {
        let xs = [self.bbox[0], self.bbox[2], self.bbox[4], self.bbox[6]];
        let ys = [self.bbox[1], self.bbox[3], self.bbox[5], self.bbox[7]];

        let min_x = xs.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_x = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let min_y = ys.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_y = ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        (min_x, min_y, max_x, max_y)
    }
}

/// Result of OCR processing on an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// Recognized text boxes in reading order.
    pub boxes: Vec<TextBox>,

    /// Full text (boxes joined with newlines).
    pub text: String,

    /// Processing time in milliseconds.
    pub processing_time_ms: u64,
}

impl OcrResult {
    /// Build a result from boxes, sorting them into reading order
    /// (top-to-bottom in 20px bands, then left-to-right).
    pub fn from_boxes(mut boxes: Vec<TextBox>, processing_time_ms: u64) -> Self {
        boxes.sort_by(|a, b| {
            let (ax, ay, _, _) = a.rect();
            let (bx, by, _, _) = b.rect();
            let row_a = (ay / 20.0) as i32;
            let row_b = (by / 20.0) as i32;
            row_a
                .cmp(&row_b)
                .then(ax.partial_cmp(&bx).unwrap_or(std::cmp::Ordering::Equal))
        });

        let text = boxes
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            boxes,
            text,
            processing_time_ms,
        }
    }
}

/// Recognizes text in a rendered or embedded page image.
pub trait OcrEngine {
    /// Process an image and return the recognized text boxes.
    fn process(&self, image: &DynamicImage) -> Result<OcrResult, OcrError>;

    /// Convenience: extract text only.
    fn extract_text(&self, image: &DynamicImage) -> Result<String, OcrError> {
        Ok(self.process(image)?.text)
    }
}
