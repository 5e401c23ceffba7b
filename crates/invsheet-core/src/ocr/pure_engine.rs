//! Pure Rust OCR engine wrapper using `pure-onnx-ocr`.

use std::path::Path;
use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::OcrConfig;

use super::{OcrEngine, OcrResult, TextBox};

/// OCR engine backed by `pure-onnx-ocr` PaddleOCR models.
pub struct PureOcrEngine {
    engine: pure_onnx_ocr::engine::OcrEngine,
    keep_unk: bool,
}

impl PureOcrEngine {
    /// Create an engine from the model files in `config.model_dir`.
    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        Self::from_dir(&config.model_dir, config.keep_unk)
    }

    /// Create an engine from model files in a directory.
    pub fn from_dir(model_dir: &Path, keep_unk: bool) -> Result<Self, OcrError> {
        let [det, rec, dict] = OcrConfig::MODEL_FILES;
        let det_path = model_dir.join(det);
        let rec_path = model_dir.join(rec);
        let dict_path = model_dir.join(dict);

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(&det_path)
            .rec_model_path(&rec_path)
            .dictionary_path(&dict_path)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

        info!("Loaded OCR models from {}", model_dir.display());

        Ok(Self { engine, keep_unk })
    }
}

impl OcrEngine for PureOcrEngine {
    fn process(&self, image: &DynamicImage) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let (width, height) = image.dimensions();

        let results = self
            .engine
            .run_from_image(image)
            .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

        let boxes: Vec<TextBox> = results
            .iter()
            .map(|r| {
                let mut bbox = [0.0f32; 8];
                for (i, coord) in r.bounding_box.exterior().coords().take(4).enumerate() {
                    bbox[i * 2] = coord.x as f32;
                    bbox[i * 2 + 1] = coord.y as f32;
                }
                let text = if self.keep_unk {
                    r.text.clone()
                } else {
                    r.text.replace("[UNK]", " ")
                };
                TextBox {
                    bbox,
                    text,
                    confidence: r.confidence,
                }
            })
            .collect();

        let result = OcrResult::from_boxes(boxes, start.elapsed().as_millis() as u64);
        debug!(
            "OCR on {}x{} image: {} text boxes in {}ms",
            width,
            height,
            result.boxes.len(),
            result.processing_time_ms
        );
        Ok(result)
    }
}
