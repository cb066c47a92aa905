use std::sync::Arc;

use crate::application::ports::{ArtifactStore, JobBroker, JobStore, TreeStore};
use crate::application::services::AdmissionController;
use crate::presentation::config::Settings;

/// Collaborator handles threaded through the HTTP surface. Every dependency
/// is an explicit Arc'd port; nothing global.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub tree: Arc<dyn TreeStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub broker: Arc<dyn JobBroker>,
    pub admission: Arc<AdmissionController>,
    pub settings: Arc<Settings>,
}
