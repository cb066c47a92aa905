use async_trait::async_trait;
use image::DynamicImage;

/// Rendering seam between the pipeline and the PDF engine. Implementations
/// are stateless over the document bytes so that a single rendered page is
/// the peak in-memory footprint.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn page_count(&self, pdf: &[u8]) -> Result<u32, PdfRenderError>;

    /// Page size in PDF points (1/72 in).
    async fn page_size(&self, pdf: &[u8], page_index: u32) -> Result<(f64, f64), PdfRenderError>;

    async fn render_page(
        &self,
        pdf: &[u8],
        page_index: u32,
        dpi: u32,
    ) -> Result<DynamicImage, PdfRenderError>;

    /// Embedded text layer under a normalized region, when the PDF has one.
    /// Empty string when the region carries no text.
    async fn extract_region_text(
        &self,
        pdf: &[u8],
        page_index: u32,
        region_norm: [f64; 4],
    ) -> Result<String, PdfRenderError>;

    /// Cut a normalized region of one page into a standalone single-page PDF.
    async fn crop_region_pdf(
        &self,
        pdf: &[u8],
        page_index: u32,
        region_norm: [f64; 4],
        padding_pt: f64,
    ) -> Result<Vec<u8>, PdfRenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PdfRenderError {
    #[error("pdf open failed: {0}")]
    OpenFailed(String),
    #[error("page {0} out of range")]
    PageOutOfRange(u32),
    #[error("render failed: {0}")]
    RenderFailed(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
}
