//! Per-page PDF text and image extraction using lopdf and pdf-extract.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, trace, warn};

use super::{PdfProcessor, Result};
use crate::error::PdfError;

/// PDF content extractor using lopdf, with pdf-extract for text layout.
pub struct PdfExtractor {
    document: Option<Document>,
    raw_data: Vec<u8>,
}

impl PdfExtractor {
    /// Create a new PDF extractor.
    pub fn new() -> Self {
        Self {
            document: None,
            raw_data: Vec::new(),
        }
    }

    /// Create an extractor and load `data` into it.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut extractor = Self::new();
        extractor.load(data)?;
        Ok(extractor)
    }

    fn document(&self) -> Result<&Document> {
        self.document
            .as_ref()
            .ok_or_else(|| PdfError::Parse("No document loaded".to_string()))
    }

    /// Page text through pdf-extract, which lays text out better than lopdf
    /// but panics on some malformed fonts.
    fn pages_via_pdf_extract(&self) -> Option<Vec<String>> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(&self.raw_data)
        }));
        match outcome {
            Ok(Ok(pages)) => Some(pages),
            Ok(Err(e)) => {
                warn!("pdf-extract failed, using lopdf text: {}", e);
                None
            }
            Err(_) => {
                warn!("pdf-extract panicked, using lopdf text");
                None
            }
        }
    }

    fn pages_via_lopdf(&self, doc: &Document) -> Vec<String> {
        doc.get_pages()
            .keys()
            .map(|&number| {
                doc.extract_text(&[number]).unwrap_or_else(|e| {
                    debug!("No text on page {}: {}", number, e);
                    String::new()
                })
            })
            .collect()
    }

    /// Resources for a page, walking up the page tree for inherited entries.
    fn page_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
        let mut node_id = page_id;
        loop {
            let node = doc.get_dictionary(node_id).ok()?;
            if let Ok(resources) = node.get(b"Resources") {
                if let Ok((_, Object::Dictionary(dict))) = doc.dereference(resources) {
                    return Some(dict.clone());
                }
            }
            match node.get(b"Parent") {
                Ok(Object::Reference(parent)) => node_id = *parent,
                _ => return None,
            }
        }
    }

    fn decode_image(doc: &Document, object: &Object) -> Option<DynamicImage> {
        let Object::Stream(stream) = object else {
            return None;
        };
        let dict = &stream.dict;
        if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
            return None;
        }

        let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
        let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
        if width == 0 || height == 0 {
            return None;
        }

        let filters: Vec<&[u8]> = match dict.get(b"Filter") {
            Ok(Object::Name(name)) => vec![name.as_slice()],
            Ok(Object::Array(items)) => items.iter().filter_map(|o| o.as_name().ok()).collect(),
            _ => Vec::new(),
        };

        match filters.last().copied() {
            Some(b"DCTDecode") => {
                let jpeg = Self::apply_filters(stream, &filters[..filters.len() - 1])?;
                return image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).ok();
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                trace!("Skipping {}x{} image with unsupported filter", width, height);
                return None;
            }
            _ => {}
        }

        let is_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
        let (space, bits) = if is_mask {
            (ColorSpace::Gray, 1)
        } else {
            let space = match dict.get(b"ColorSpace") {
                Ok(object) => ColorSpace::resolve(doc, object)?,
                Err(_) => ColorSpace::Rgb,
            };
            let bits = dict
                .get(b"BitsPerComponent")
                .ok()
                .and_then(|o| o.as_i64().ok())
                .unwrap_or(8);
            (space, bits)
        };

        let data = Self::apply_filters(stream, &filters).unwrap_or_else(|| stream.content.clone());
        let (samples, bits) = unpack_samples(
            &data,
            width as usize,
            height as usize,
            space.components(),
            usize::try_from(bits).ok()?,
        )?;
        let inverted = match dict.get(b"Decode") {
            Ok(Object::Array(range)) => range.first().and_then(|o| o.as_float().ok()) == Some(1.0),
            _ => false,
        };

        let image = space.to_image(width, height, &samples, bits, inverted);
        if image.is_none() {
            trace!(
                "Could not decode {}x{} image: {:?}, {} bits, data_len={}",
                width,
                height,
                space,
                bits,
                data.len()
            );
        }
        image
    }

    /// Stream content decoded through `filters` only, so a trailing image
    /// codec can be applied separately.
    fn apply_filters(stream: &Stream, filters: &[&[u8]]) -> Option<Vec<u8>> {
        if filters.is_empty() {
            return Some(stream.content.clone());
        }

        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            filters
                .iter()
                .map(|f| Object::Name(f.to_vec()))
                .collect::<Vec<_>>(),
        );
        // lopdf only reads a single parameter dictionary
        match stream.dict.get(b"DecodeParms") {
            Ok(Object::Array(params)) => {
                if let Some(first) = params.first() {
                    dict.set("DecodeParms", first.clone());
                }
            }
            Ok(params) => dict.set("DecodeParms", params.clone()),
            Err(_) => {}
        }
        Stream::new(dict, stream.content.clone())
            .decompressed_content()
            .ok()
    }
}

/// Colour spaces an image XObject can be turned into pixels from.
#[derive(Debug)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorSpace>, palette: Vec<u8> },
}

impl ColorSpace {
    fn resolve(doc: &Document, object: &Object) -> Option<Self> {
        let (_, object) = doc.dereference(object).ok()?;
        match object {
            Object::Name(name) => Self::from_name(name),
            Object::Array(items) => match items.first()?.as_name().ok()? {
                b"ICCBased" => {
                    let (_, profile) = doc.dereference(items.get(1)?).ok()?;
                    match profile.as_stream().ok()?.dict.get(b"N").ok()?.as_i64().ok()? {
                        1 => Some(Self::Gray),
                        3 => Some(Self::Rgb),
                        4 => Some(Self::Cmyk),
                        _ => None,
                    }
                }
                b"Indexed" | b"I" => {
                    let base = Self::resolve(doc, items.get(1)?)?;
                    if matches!(base, Self::Indexed { .. }) {
                        return None;
                    }
                    let (_, lookup) = doc.dereference(items.get(3)?).ok()?;
                    let palette = match lookup {
                        Object::String(bytes, _) => bytes.clone(),
                        Object::Stream(table) => table
                            .decompressed_content()
                            .unwrap_or_else(|_| table.content.clone()),
                        _ => return None,
                    };
                    Some(Self::Indexed {
                        base: Box::new(base),
                        palette,
                    })
                }
                b"CalGray" => Some(Self::Gray),
                b"CalRGB" => Some(Self::Rgb),
                _ => None,
            },
            _ => None,
        }
    }

    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => Some(Self::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Some(Self::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(Self::Cmyk),
            _ => None,
        }
    }

    fn components(&self) -> usize {
        match self {
            Self::Gray | Self::Indexed { .. } => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    /// One colour in this space as RGB, components already scaled to 0..=255.
    fn rgb(&self, values: &[u8]) -> [u8; 3] {
        match (self, values) {
            (Self::Gray, [v, ..]) => [*v, *v, *v],
            (Self::Rgb, [r, g, b, ..]) => [*r, *g, *b],
            (Self::Cmyk, [c, m, y, k, ..]) => {
                let channel = |v: u8| ((255 - v as u16) * (255 - *k as u16) / 255) as u8;
                [channel(*c), channel(*m), channel(*y)]
            }
            _ => [0, 0, 0],
        }
    }

    fn to_image(&self, width: u32, height: u32, samples: &[u8], bits: usize, inverted: bool) -> Option<DynamicImage> {
        let max = (1u16 << bits) - 1;
        let scale = |v: u8| {
            let v = (v as u16 * 255 / max) as u8;
            if inverted { 255 - v } else { v }
        };

        match self {
            Self::Gray => GrayImage::from_raw(width, height, samples.iter().map(|&v| scale(v)).collect())
                .map(DynamicImage::ImageLuma8),
            Self::Rgb => RgbImage::from_raw(width, height, samples.iter().map(|&v| scale(v)).collect())
                .map(DynamicImage::ImageRgb8),
            Self::Cmyk => {
                let scaled: Vec<u8> = samples.iter().map(|&v| scale(v)).collect();
                let pixels = scaled.chunks_exact(4).flat_map(|c| self.rgb(c)).collect();
                RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
            }
            Self::Indexed { base, palette } => {
                let n = base.components();
                let pixels = samples
                    .iter()
                    .flat_map(|&index| {
                        let start = index as usize * n;
                        palette
                            .get(start..start + n)
                            .map(|entry| base.rgb(entry))
                            .unwrap_or([0, 0, 0])
                    })
                    .collect();
                RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
            }
        }
    }
}

/// Unpack image rows into one byte per sample.
///
/// Rows start on a byte boundary. 16-bit samples keep their high byte, so the
/// returned bit depth is at most 8. Returns `None` when the data is short or
/// the dimensions overflow.
fn unpack_samples(
    data: &[u8],
    width: usize,
    height: usize,
    components: usize,
    bits: usize,
) -> Option<(Vec<u8>, usize)> {
    if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
        return None;
    }
    let per_row = width.checked_mul(components)?;
    let row_bytes = per_row.checked_mul(bits)?.div_ceil(8);
    let needed = row_bytes.checked_mul(height)?;
    if row_bytes == 0 || data.len() < needed {
        return None;
    }

    let mut samples = Vec::with_capacity(per_row.checked_mul(height)?);
    for row in data[..needed].chunks_exact(row_bytes) {
        match bits {
            8 => samples.extend_from_slice(&row[..per_row]),
            16 => samples.extend(row.chunks_exact(2).map(|pair| pair[0])),
            _ => {
                let mask = (1u8 << bits) - 1;
                samples.extend((0..per_row).map(|i| {
                    let offset = i * bits;
                    (row[offset / 8] >> (8 - bits - offset % 8)) & mask
                }));
            }
        }
    }
    Some((samples, bits.min(8)))
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfProcessor for PdfExtractor {
    fn load(&mut self, data: &[u8]) -> Result<()> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            // pdf-extract reads the raw bytes, so hand it the decrypted copy
            let mut decrypted = Vec::new();
            doc.save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("Failed to save decrypted PDF: {}", e)))?;
            self.raw_data = decrypted;
        } else {
            self.raw_data = data.to_vec();
        }

        debug!("Loaded PDF with {} pages", doc.get_pages().len());
        self.document = Some(doc);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.document
            .as_ref()
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    fn extract_page_texts(&self) -> Result<Vec<String>> {
        let doc = self.document()?;
        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Ok(Vec::new());
        }

        let pages = match self.pages_via_pdf_extract() {
            Some(pages) if pages.len() == page_count => pages,
            Some(pages) => {
                warn!(
                    "pdf-extract returned {} pages for a {}-page document, using lopdf text",
                    pages.len(),
                    page_count
                );
                self.pages_via_lopdf(doc)
            }
            None => self.pages_via_lopdf(doc),
        };

        debug!(
            "Extracted {} chars of embedded text from {} pages",
            pages.iter().map(String::len).sum::<usize>(),
            pages.len()
        );
        Ok(pages)
    }

    fn extract_page_images(&self, page: u32) -> Result<Vec<DynamicImage>> {
        let doc = self.document()?;
        let page_id = *doc
            .get_pages()
            .get(&page)
            .ok_or(PdfError::InvalidPage(page))?;

        let mut images = Vec::new();
        let Some(resources) = Self::page_resources(doc, page_id) else {
            return Ok(images);
        };

        if let Ok(xobjects) = resources.get(b"XObject") {
            if let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) {
                for (_, reference) in xobjects.iter() {
                    if let Ok((_, object)) = doc.dereference(reference) {
                        if let Some(image) = Self::decode_image(doc, object) {
                            images.push(image);
                        }
                    }
                }
            }
        }

        debug!("Extracted {} images from page {}", images.len(), page);
        Ok(images)
    }
}
