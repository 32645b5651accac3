use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ExtractionError;
use crate::extract::{Bitmap, ExtractionBackend};

/// Production backend: lopdf for the native text layer, poppler's
/// `pdftoppm` for rendering and Tesseract (via leptess) for recognition.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    dpi: u32,
}

impl TesseractBackend {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }
}

impl ExtractionBackend for TesseractBackend {
    fn extract_native_text(&self, pdf_path: &Path) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("extract.native").entered();

        let doc = lopdf::Document::load(pdf_path)
            .map_err(|e| ExtractionError::Backend(format!("Failed to load PDF: {}", e)))?;

        let mut text = String::new();
        for (page_num, _) in doc.get_pages() {
            if let Ok(page_text) = doc.extract_text(&[page_num]) {
                text.push_str(&page_text);
                text.push('\n');
            }
        }

        Ok(text)
    }

    fn render_to_images(&self, pdf_path: &Path) -> Result<Vec<Bitmap>, ExtractionError> {
        let _span = tracing::info_span!("extract.render", dpi = self.dpi).entered();

        let work_dir =
            std::env::temp_dir().join(format!("docsorter_render_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&work_dir).map_err(|e| {
            ExtractionError::Backend(format!("Failed to create render directory: {}", e))
        })?;

        let result = render_pages(pdf_path, &work_dir, self.dpi);
        let _ = std::fs::remove_dir_all(&work_dir);
        result
    }

    fn recognize_text(&self, bitmap: &Bitmap, languages: &str) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("extract.ocr", page = %bitmap.label).entered();

        let img = image::load_from_memory(&bitmap.data)
            .map_err(|e| ExtractionError::Backend(format!("Failed to load image: {}", e)))?;

        // leptess wants a format Leptonica understands; normalize to PNG.
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ExtractionError::Backend(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, languages).map_err(|e| {
            ExtractionError::Backend(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ExtractionError::Backend(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ExtractionError::Backend(format!("OCR failed: {}", e)))
    }
}

fn render_pages(
    pdf_path: &Path,
    work_dir: &Path,
    dpi: u32,
) -> Result<Vec<Bitmap>, ExtractionError> {
    let prefix = work_dir.join("page");

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf_path)
        .arg(&prefix)
        .output()
        .map_err(|e| {
            ExtractionError::Backend(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ExtractionError::Backend(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let mut pages: Vec<PathBuf> = std::fs::read_dir(work_dir)
        .map_err(|e| ExtractionError::Backend(format!("Failed to list rendered pages: {}", e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect();
    // pdftoppm zero-pads page numbers to a fixed width, so names sort in page order.
    pages.sort();

    pages
        .into_iter()
        .map(|page| {
            let data = std::fs::read(&page).map_err(|e| {
                ExtractionError::Backend(format!("Failed to read rendered page: {}", e))
            })?;
            let label = page
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("page")
                .to_string();
            Ok(Bitmap { label, data })
        })
        .collect()
}
