//! pdfium-backed implementation of the rendering seam. All pdfium work runs
//! on the blocking pool behind a panic guard; the library is bound from the
//! system at call time.

use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;

use crate::application::ports::{PdfRenderError, PdfRenderer};

pub struct PdfiumRenderer;

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn bind() -> Result<Pdfium, PdfRenderError> {
    Ok(Pdfium::new(Pdfium::bind_to_system_library().map_err(
        |e| PdfRenderError::OpenFailed(format!("pdfium bind failed: {e}")),
    )?))
}

async fn run_blocking<T, F>(task: F) -> Result<T, PdfRenderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PdfRenderError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).unwrap_or_else(|_| {
            Err(PdfRenderError::RenderFailed(
                "panic inside pdfium call".to_string(),
            ))
        })
    })
    .await
    .map_err(|e| PdfRenderError::RenderFailed(format!("task join error: {e}")))?
}

fn render_page_blocking(
    data: &[u8],
    page_index: u32,
    dpi: u32,
) -> Result<DynamicImage, PdfRenderError> {
    let pdfium = bind()?;
    let doc = pdfium
        .load_pdf_from_byte_slice(data, None)
        .map_err(|e| PdfRenderError::OpenFailed(format!("pdfium open failed: {e}")))?;

    let page = doc
        .pages()
        .get(page_index as u16)
        .map_err(|_| PdfRenderError::PageOutOfRange(page_index))?;

    let width = (page.width().value * dpi as f32 / 72.0) as i32;
    let height = (page.height().value * dpi as f32 / 72.0) as i32;

    let bitmap = page
        .render_with_config(
            &PdfRenderConfig::new()
                .set_target_width(width)
                .set_target_height(height),
        )
        .map_err(|e| PdfRenderError::RenderFailed(format!("render page {page_index}: {e}")))?;

    Ok(bitmap.as_image())
}

#[async_trait]
impl PdfRenderer for PdfiumRenderer {
    async fn page_count(&self, pdf: &[u8]) -> Result<u32, PdfRenderError> {
        let data = pdf.to_vec();
        run_blocking(move || {
            let pdfium = bind()?;
            let doc = pdfium
                .load_pdf_from_byte_slice(&data, None)
                .map_err(|e| PdfRenderError::OpenFailed(e.to_string()))?;
            Ok(u32::from(doc.pages().len()))
        })
        .await
    }

    async fn page_size(&self, pdf: &[u8], page_index: u32) -> Result<(f64, f64), PdfRenderError> {
        let data = pdf.to_vec();
        run_blocking(move || {
            let pdfium = bind()?;
            let doc = pdfium
                .load_pdf_from_byte_slice(&data, None)
                .map_err(|e| PdfRenderError::OpenFailed(e.to_string()))?;
            let page = doc
                .pages()
                .get(page_index as u16)
                .map_err(|_| PdfRenderError::PageOutOfRange(page_index))?;
            Ok((f64::from(page.width().value), f64::from(page.height().value)))
        })
        .await
    }

    async fn render_page(
        &self,
        pdf: &[u8],
        page_index: u32,
        dpi: u32,
    ) -> Result<DynamicImage, PdfRenderError> {
        let data = pdf.to_vec();
        run_blocking(move || render_page_blocking(&data, page_index, dpi)).await
    }

    async fn extract_region_text(
        &self,
        pdf: &[u8],
        page_index: u32,
        region_norm: [f64; 4],
    ) -> Result<String, PdfRenderError> {
        let data = pdf.to_vec();
        run_blocking(move || {
            let pdfium = bind()?;
            let doc = pdfium
                .load_pdf_from_byte_slice(&data, None)
                .map_err(|e| PdfRenderError::OpenFailed(e.to_string()))?;
            let page = doc
                .pages()
                .get(page_index as u16)
                .map_err(|_| PdfRenderError::PageOutOfRange(page_index))?;

            let page_w = page.width().value;
            let page_h = page.height().value;
            let [x1, y1, x2, y2] = region_norm;

            // Normalized coordinates are top-based; PDF space is bottom-based.
            let rect = PdfRect::new(
                PdfPoints::new(page_h * (1.0 - y2 as f32)),
                PdfPoints::new(page_w * x1 as f32),
                PdfPoints::new(page_h * (1.0 - y1 as f32)),
                PdfPoints::new(page_w * x2 as f32),
            );

            let text = page
                .text()
                .map_err(|e| PdfRenderError::RenderFailed(format!("text layer: {e}")))?;
            Ok(text.inside_rect(rect).trim().to_string())
        })
        .await
    }

    async fn crop_region_pdf(
        &self,
        pdf: &[u8],
        page_index: u32,
        region_norm: [f64; 4],
        padding_pt: f64,
    ) -> Result<Vec<u8>, PdfRenderError> {
        let data = pdf.to_vec();
        run_blocking(move || {
            let pdfium = bind()?;
            let source = pdfium
                .load_pdf_from_byte_slice(&data, None)
                .map_err(|e| PdfRenderError::OpenFailed(e.to_string()))?;

            let mut dest = pdfium
                .create_new_pdf()
                .map_err(|e| PdfRenderError::EncodeFailed(e.to_string()))?;
            dest.pages_mut()
                .copy_page_from_document(&source, page_index as u16, 0)
                .map_err(|e| PdfRenderError::EncodeFailed(format!("page copy: {e}")))?;

            let mut page = dest
                .pages()
                .get(0)
                .map_err(|_| PdfRenderError::PageOutOfRange(page_index))?;

            let page_w = page.width().value;
            let page_h = page.height().value;
            let [x1, y1, x2, y2] = region_norm;
            let pad = padding_pt as f32;

            let left = (page_w * x1 as f32 - pad).max(0.0);
            let right = (page_w * x2 as f32 + pad).min(page_w);
            let bottom = (page_h * (1.0 - y2 as f32) - pad).max(0.0);
            let top = (page_h * (1.0 - y1 as f32) + pad).min(page_h);

            let rect = PdfRect::new(
                PdfPoints::new(bottom),
                PdfPoints::new(left),
                PdfPoints::new(top),
                PdfPoints::new(right),
            );
            page.boundaries_mut()
                .set_crop(rect)
                .map_err(|e| PdfRenderError::EncodeFailed(format!("crop box: {e}")))?;

            dest.save_to_bytes()
                .map_err(|e| PdfRenderError::EncodeFailed(e.to_string()))
        })
        .await
    }
}
