use image::DynamicImage;
use mupdf::{Colorspace, Document, Matrix};

use crate::core::error::ProxyError;

// ---------------------------------------------------------------------------
// Document rasterization (MuPDF)
// ---------------------------------------------------------------------------

/// Render page 0 of a paginated document (PDF, EPUB, MOBI, Office
/// formats) to an RGB image.
pub fn rasterize_first_page(
    bytes: &[u8],
    media_type: &str,
) -> Result<DynamicImage, ProxyError> {
    let magic = magic_for(media_type);
    let document = Document::from_bytes(bytes, magic)
        .map_err(|e| ProxyError::Internal(format!("failed to open document: {}", e)))?;

    let page_count = document
        .page_count()
        .map_err(|e| ProxyError::Internal(format!("failed to read document: {}", e)))?;
    if page_count == 0 {
        return Err(ProxyError::Internal("no pages found".to_string()));
    }

    let page = document
        .load_page(0)
        .map_err(|e| ProxyError::Internal(format!("failed to load page: {}", e)))?;

    let pixmap = page
        .to_pixmap(&Matrix::IDENTITY, &Colorspace::device_rgb(), 0.0, false)
        .map_err(|e| ProxyError::Internal(format!("failed to render page: {}", e)))?;

    let width = pixmap.width();
    let height = pixmap.height();
    let samples = pixmap.samples().to_vec();

    image::RgbImage::from_raw(width, height, samples)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| ProxyError::Internal("rendered page has invalid geometry".to_string()))
}

/// MuPDF selects its handler from a filename-style magic string.
fn magic_for(media_type: &str) -> &'static str {
    match media_type {
        "application/pdf" => "document.pdf",
        "application/epub+zip" => "document.epub",
        "application/x-mobipocket-ebook" => "document.mobi",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            "document.docx"
        }
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "document.xlsx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            "document.pptx"
        }
        _ => "document.pdf",
    }
}
