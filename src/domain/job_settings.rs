/// Per-job model selection, one row per job. Model identifiers are opaque
/// provider strings; empty means "fall back to the configured default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSettings {
    pub text_model: String,
    pub table_model: String,
    pub image_model: String,
    pub stamp_model: String,
    pub is_correction_mode: bool,
}

impl JobSettings {
    pub fn models(
        text_model: impl Into<String>,
        table_model: impl Into<String>,
        image_model: impl Into<String>,
        stamp_model: impl Into<String>,
    ) -> Self {
        Self {
            text_model: text_model.into(),
            table_model: table_model.into(),
            image_model: image_model.into(),
            stamp_model: stamp_model.into(),
            is_correction_mode: false,
        }
    }
}
