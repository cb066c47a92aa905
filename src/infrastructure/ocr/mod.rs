mod echo_backend;
mod factory;
mod segmentation_backend;
mod vision_api_backend;

pub use echo_backend::EchoBackend;
pub use factory::{BackendConfig, OcrBackendFactory};
pub use segmentation_backend::SegmentationBackend;
pub use vision_api_backend::VisionApiBackend;
