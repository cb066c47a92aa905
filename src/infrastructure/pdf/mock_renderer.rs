use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::application::ports::{PdfRenderError, PdfRenderer};

/// Deterministic renderer for the test suites: white pages of a fixed point
/// size, empty text layer, placeholder crop PDFs. Ignores the actual PDF
/// bytes entirely.
pub struct MockPdfRenderer {
    page_count: u32,
    page_width_pt: f64,
    page_height_pt: f64,
    text_layer: String,
}

impl MockPdfRenderer {
    pub fn new(page_count: u32, page_width_pt: f64, page_height_pt: f64) -> Self {
        Self {
            page_count,
            page_width_pt,
            page_height_pt,
            text_layer: String::new(),
        }
    }

    pub fn with_text_layer(mut self, text: impl Into<String>) -> Self {
        self.text_layer = text.into();
        self
    }
}

#[async_trait]
impl PdfRenderer for MockPdfRenderer {
    async fn page_count(&self, _pdf: &[u8]) -> Result<u32, PdfRenderError> {
        Ok(self.page_count)
    }

    async fn page_size(
        &self,
        _pdf: &[u8],
        page_index: u32,
    ) -> Result<(f64, f64), PdfRenderError> {
        if page_index >= self.page_count {
            return Err(PdfRenderError::PageOutOfRange(page_index));
        }
        Ok((self.page_width_pt, self.page_height_pt))
    }

    async fn render_page(
        &self,
        _pdf: &[u8],
        page_index: u32,
        dpi: u32,
    ) -> Result<DynamicImage, PdfRenderError> {
        if page_index >= self.page_count {
            return Err(PdfRenderError::PageOutOfRange(page_index));
        }
        let width = (self.page_width_pt * f64::from(dpi) / 72.0) as u32;
        let height = (self.page_height_pt * f64::from(dpi) / 72.0) as u32;
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width.max(1),
            height.max(1),
            Rgba([255, 255, 255, 255]),
        )))
    }

    async fn extract_region_text(
        &self,
        _pdf: &[u8],
        page_index: u32,
        _region_norm: [f64; 4],
    ) -> Result<String, PdfRenderError> {
        if page_index >= self.page_count {
            return Err(PdfRenderError::PageOutOfRange(page_index));
        }
        Ok(self.text_layer.clone())
    }

    async fn crop_region_pdf(
        &self,
        _pdf: &[u8],
        page_index: u32,
        _region_norm: [f64; 4],
        _padding_pt: f64,
    ) -> Result<Vec<u8>, PdfRenderError> {
        if page_index >= self.page_count {
            return Err(PdfRenderError::PageOutOfRange(page_index));
        }
        Ok(b"%PDF-1.4\n% mock crop\n%%EOF\n".to_vec())
    }
}
