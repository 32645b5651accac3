//! Content extraction: native PDF text first, OCR as the fallback.

pub mod tesseract;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::error::ExtractionError;
use crate::media::MediaType;

pub use tesseract::TesseractBackend;

/// Marker emitted by some PDF text extractors for CID fonts they can't map.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMethod {
    Native,
    Ocr,
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub text: String,
    pub source_method: SourceMethod,
}

/// An encoded raster image (PNG, JPEG, ...) ready for recognition.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub label: String,
    pub data: Vec<u8>,
}

/// The external text/OCR capability.
pub trait ExtractionBackend: Send + Sync {
    fn extract_native_text(&self, pdf_path: &Path) -> Result<String, ExtractionError>;
    fn render_to_images(&self, pdf_path: &Path) -> Result<Vec<Bitmap>, ExtractionError>;
    fn recognize_text(&self, bitmap: &Bitmap, languages: &str) -> Result<String, ExtractionError>;
}

/// Uniform extraction entry point used by the pipeline.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, media: MediaType) -> Result<ExtractionResult, ExtractionError>;
}

pub struct ContentExtractor<B> {
    backend: B,
    languages: String,
    min_content_length: usize,
}

impl<B: ExtractionBackend> ContentExtractor<B> {
    pub fn new(backend: B, languages: impl Into<String>, min_content_length: usize) -> Self {
        Self {
            backend,
            languages: languages.into(),
            min_content_length,
        }
    }

    fn is_useful(&self, text: &str) -> bool {
        let cleaned = text.replace(IDENTITY_H_PATTERN, "");
        let trimmed = cleaned.trim();
        !trimmed.is_empty() && trimmed.chars().count() >= self.min_content_length
    }

    fn bitmaps_for(&self, path: &Path, media: MediaType) -> Result<Vec<Bitmap>, ExtractionError> {
        if media.is_pdf() {
            return self.backend.render_to_images(path);
        }
        let data = std::fs::read(path).map_err(|e| ExtractionError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let label = crate::sanitize::redact_path(path);
        Ok(vec![Bitmap { label, data }])
    }

    /// Recognizes every bitmap and concatenates the results. The error is
    /// only returned when no bitmap could be recognized at all.
    fn recognize_all(&self, bitmaps: &[Bitmap]) -> (String, Option<ExtractionError>) {
        let mut text = String::new();
        let mut last_error = None;
        let mut any_ok = false;

        for bitmap in bitmaps {
            match self.backend.recognize_text(bitmap, &self.languages) {
                Ok(page_text) => {
                    any_ok = true;
                    debug!(page = %bitmap.label, chars = page_text.len(), "recognized page");
                    if !page_text.trim().is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(page_text.trim_end());
                    }
                }
                Err(e) => {
                    warn!(page = %bitmap.label, "recognition failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if any_ok {
            (text, None)
        } else {
            (text, last_error)
        }
    }
}

impl<B: ExtractionBackend> TextExtractor for ContentExtractor<B> {
    fn extract(&self, path: &Path, media: MediaType) -> Result<ExtractionResult, ExtractionError> {
        let _span = info_span!("extract", media = %media).entered();

        if !path.exists() {
            return Err(ExtractionError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }

        let mut native = String::new();
        if media.is_pdf() {
            match self.backend.extract_native_text(path) {
                Ok(text) if self.is_useful(&text) => {
                    info!(chars = text.len(), "using native PDF text layer");
                    return Ok(ExtractionResult {
                        text,
                        source_method: SourceMethod::Native,
                    });
                }
                Ok(text) => {
                    info!(
                        chars = text.trim().len(),
                        "native text below usefulness threshold, falling back to OCR"
                    );
                    native = text.replace(IDENTITY_H_PATTERN, "").trim().to_string();
                }
                Err(e) => warn!("native text extraction failed: {}", e),
            }
        }

        let (ocr_text, backend_error) = match self.bitmaps_for(path, media) {
            Ok(bitmaps) => {
                debug!(pages = bitmaps.len(), "running OCR");
                self.recognize_all(&bitmaps)
            }
            Err(e @ ExtractionError::Read { .. }) => return Err(e),
            Err(e) => {
                warn!("rendering failed: {}", e);
                (String::new(), Some(e))
            }
        };

        if !ocr_text.trim().is_empty() {
            info!(chars = ocr_text.len(), "OCR extraction complete");
            return Ok(ExtractionResult {
                text: ocr_text,
                source_method: SourceMethod::Ocr,
            });
        }

        // Short native text still beats nothing.
        if !native.is_empty() {
            return Ok(ExtractionResult {
                text: native,
                source_method: SourceMethod::Native,
            });
        }

        match backend_error {
            Some(e) => Err(e),
            None => Err(ExtractionError::NoContent(path.to_path_buf())),
        }
    }
}
