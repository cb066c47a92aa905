use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::auth::require_api_key;
use super::handlers::{
    create_draft_handler, create_job_handler, create_node_handler, delete_job_handler,
    delete_node_handler, get_job_handler, get_node_handler, health_handler, job_details_handler,
    job_result_handler, jobs_changes_handler, list_jobs_handler, list_node_files_handler,
    list_nodes_handler, patch_job_handler, pause_job_handler, queue_handler,
    register_node_file_handler, restart_job_handler, resume_job_handler,
    storage_delete_batch_handler, storage_delete_handler, storage_download_handler,
    storage_exists_handler, storage_list_handler, storage_upload_handler,
    storage_upload_text_handler, start_draft_handler,
};
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health_handler))
        .route("/queue", get(queue_handler))
        .route("/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/jobs/draft", post(create_draft_handler))
        .route("/jobs/changes", get(jobs_changes_handler))
        .route(
            "/jobs/{job_id}",
            get(get_job_handler)
                .patch(patch_job_handler)
                .delete(delete_job_handler),
        )
        .route("/jobs/{job_id}/start", post(start_draft_handler))
        .route("/jobs/{job_id}/details", get(job_details_handler))
        .route("/jobs/{job_id}/result", get(job_result_handler))
        .route("/jobs/{job_id}/pause", post(pause_job_handler))
        .route("/jobs/{job_id}/resume", post(resume_job_handler))
        .route("/jobs/{job_id}/restart", post(restart_job_handler))
        .route("/api/storage/exists/{*key}", get(storage_exists_handler))
        .route("/api/storage/upload/{*key}", post(storage_upload_handler))
        .route("/api/storage/upload-text", post(storage_upload_text_handler))
        .route("/api/storage/download/{*key}", get(storage_download_handler))
        .route("/api/storage/delete/{*key}", delete(storage_delete_handler))
        .route("/api/storage/delete-batch", post(storage_delete_batch_handler))
        .route("/api/storage/list/{*prefix}", get(storage_list_handler))
        .route(
            "/api/tree/nodes",
            post(create_node_handler).get(list_nodes_handler),
        )
        .route(
            "/api/tree/nodes/{node_id}",
            get(get_node_handler).delete(delete_node_handler),
        )
        .route(
            "/api/tree/nodes/{node_id}/files",
            post(register_node_file_handler).get(list_node_files_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
