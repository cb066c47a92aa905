mod artifact_store;
mod broker;
mod job_store;
mod ocr_backend;
mod pdf_renderer;
mod tree_store;

pub use artifact_store::{ArtifactStore, ArtifactStoreError};
pub use broker::{BrokerError, BrokerMessage, JobBroker};
pub use job_store::{JobStore, JobStoreError, JobStatusUpdate};
pub use ocr_backend::{OcrBackend, OcrBackendError, OcrPrompt};
pub use pdf_renderer::{PdfRenderError, PdfRenderer};
pub use tree_store::{TreeStore, TreeStoreError};
