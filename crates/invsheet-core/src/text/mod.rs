//! Text acquisition and normalization.
//!
//! Embedded page text is always extracted. When an OCR engine is supplied,
//! the images on each page are recognized as well and the two sequences are
//! paired page by page (`embedded + "\n" + ocr`). The resulting pages are
//! joined with newlines into the document string sent to the model.

use tracing::{debug, warn};

use crate::error::{PdfError, Result};
use crate::models::config::{PageMismatch, PdfConfig};
use crate::ocr::OcrEngine;
use crate::pdf::{PdfExtractor, PdfProcessor};

/// Extract per-page text from PDF bytes, merging OCR text when an engine is given.
pub fn acquire_pages(
    data: &[u8],
    ocr: Option<&dyn OcrEngine>,
    policy: PageMismatch,
) -> Result<Vec<String>> {
    let extractor = PdfExtractor::from_bytes(data)?;
    let embedded = extractor.extract_page_texts()?;

    let Some(engine) = ocr else {
        return Ok(embedded);
    };

    let recognized = ocr_pages(&extractor, engine);
    Ok(combine_pages(embedded, recognized, policy)?)
}

/// Recognize the images on every page, one string per page.
///
/// Pages without images yield an empty string. Images that fail recognition
/// are skipped with a warning.
pub fn ocr_pages(extractor: &PdfExtractor, engine: &dyn OcrEngine) -> Vec<String> {
    (1..=extractor.page_count())
        .map(|page| {
            let images = extractor.extract_page_images(page).unwrap_or_else(|e| {
                warn!("Failed to extract images from page {}: {}", page, e);
                Vec::new()
            });

            let texts: Vec<String> = images
                .iter()
                .enumerate()
                .filter_map(|(i, image)| match engine.extract_text(image) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!("OCR failed for image {} on page {}: {}", i + 1, page, e);
                        None
                    }
                })
                .collect();

            debug!("OCR page {}: {} images recognized", page, texts.len());
            texts.join("\n")
        })
        .collect()
}

/// Pair embedded and OCR page text by position.
pub fn combine_pages(
    embedded: Vec<String>,
    ocr: Vec<String>,
    policy: PageMismatch,
) -> std::result::Result<Vec<String>, PdfError> {
    if embedded.len() != ocr.len() {
        match policy {
            PageMismatch::Error => {
                return Err(PdfError::PageMismatch {
                    text: embedded.len(),
                    ocr: ocr.len(),
                });
            }
            PageMismatch::Truncate => warn!(
                "Page count mismatch ({} text, {} OCR), dropping unpaired pages",
                embedded.len(),
                ocr.len()
            ),
            PageMismatch::Pad => debug!(
                "Page count mismatch ({} text, {} OCR), padding the shorter side",
                embedded.len(),
                ocr.len()
            ),
        }
    }

    let paired = match policy {
        PageMismatch::Pad => embedded.len().max(ocr.len()),
        _ => embedded.len().min(ocr.len()),
    };

    let mut embedded = embedded.into_iter();
    let mut ocr = ocr.into_iter();
    Ok((0..paired)
        .map(|_| {
            let text = embedded.next().unwrap_or_default();
            let recognized = ocr.next().unwrap_or_default();
            format!("{}\n{}", text, recognized)
        })
        .collect())
}

/// Join page text into a single document string.
///
/// `max_chars` of 0 means unlimited; otherwise the text is cut on a char boundary.
pub fn normalize(pages: &[String], max_chars: usize) -> String {
    let text = pages.join("\n");
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text;
    }

    warn!(
        "Document text truncated from {} to {} characters",
        text.chars().count(),
        max_chars
    );
    text.chars().take(max_chars).collect()
}

/// Acquire and normalize in one step using the PDF configuration.
pub fn document_text(data: &[u8], ocr: Option<&dyn OcrEngine>, config: &PdfConfig) -> Result<String> {
    let pages = acquire_pages(data, ocr, config.page_mismatch)?;
    Ok(normalize(&pages, config.max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InvsheetError, OcrError};
    use crate::ocr::OcrResult;
    use crate::pdf::extractor::tests::build_pdf;
    use image::DynamicImage;
    use pretty_assertions::assert_eq;

    fn pages(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    struct FixedOcr;

    impl OcrEngine for FixedOcr {
        fn process(&self, _image: &DynamicImage) -> std::result::Result<OcrResult, OcrError> {
            Ok(OcrResult::from_boxes(Vec::new(), 0))
        }
    }

    #[test]
    fn test_combine_equal_lengths() {
        let combined =
            combine_pages(pages(&["a", "b"]), pages(&["A", "B"]), PageMismatch::Truncate).unwrap();
        assert_eq!(combined, pages(&["a\nA", "b\nB"]));
    }

    #[test]
    fn test_combine_truncates_to_shorter() {
        let combined =
            combine_pages(pages(&["a", "b", "c"]), pages(&["A"]), PageMismatch::Truncate).unwrap();
        assert_eq!(combined, pages(&["a\nA"]));
    }

    #[test]
    fn test_combine_pads_to_longer() {
        let combined =
            combine_pages(pages(&["a"]), pages(&["A", "B"]), PageMismatch::Pad).unwrap();
        assert_eq!(combined, pages(&["a\nA", "\nB"]));
    }

    #[test]
    fn test_combine_mismatch_error() {
        let result = combine_pages(pages(&["a", "b"]), pages(&["A"]), PageMismatch::Error);
        assert!(matches!(
            result,
            Err(PdfError::PageMismatch { text: 2, ocr: 1 })
        ));
    }

    #[test]
    fn test_normalize_joins_with_newline() {
        assert_eq!(normalize(&pages(&["one", "two"]), 0), "one\ntwo");
        assert_eq!(normalize(&[], 0), "");
    }

    #[test]
    fn test_normalize_caps_on_char_boundary() {
        assert_eq!(normalize(&pages(&["żółw", "x"]), 3), "żół");
        assert_eq!(normalize(&pages(&["abc"]), 10), "abc");
    }

    #[test]
    fn test_document_text_two_pages() {
        let data = build_pdf(&[&["Vendor Name: Acme Corp"], &["Invoice Amount: 1500"]]);
        let text = document_text(&data, None, &PdfConfig::default()).unwrap();

        let vendor = text.find("Acme Corp").unwrap();
        let amount = text.find("1500").unwrap();
        assert!(vendor < amount);
        assert!(text[vendor..amount].contains('\n'));
    }

    #[test]
    fn test_document_text_with_ocr_pairs_pages() {
        let data = build_pdf(&[&["first"], &["second"]]);
        let pages = acquire_pages(&data, Some(&FixedOcr), PageMismatch::Error).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("first"));
        assert!(pages[0].ends_with('\n'));
    }

    #[test]
    fn test_document_text_empty_pdf() {
        let data = build_pdf(&[]);
        let text = document_text(&data, None, &PdfConfig::default()).unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn test_document_text_corrupt_pdf() {
        let result = document_text(b"not a pdf at all", None, &PdfConfig::default());
        assert!(matches!(result, Err(InvsheetError::Pdf(PdfError::Parse(_)))));
    }
}
