use axum::extract::State;
use axum::Json;

use crate::application::services::QueueDepth;
use crate::presentation::error::ApiError;
use crate::presentation::state::AppState;

pub async fn queue_handler(State(state): State<AppState>) -> Result<Json<QueueDepth>, ApiError> {
    let depth = state.admission.depth().await?;
    Ok(Json(depth))
}
