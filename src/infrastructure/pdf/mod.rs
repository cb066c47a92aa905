mod mock_renderer;
mod pdfium_renderer;

pub use mock_renderer::MockPdfRenderer;
pub use pdfium_renderer::PdfiumRenderer;
