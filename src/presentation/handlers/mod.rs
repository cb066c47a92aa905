mod drafts;
mod health;
mod jobs;
mod lifecycle;
mod queue;
mod responses;
mod storage;
mod tree;

pub use drafts::{create_draft_handler, start_draft_handler};
pub use health::health_handler;
pub use jobs::{
    create_job_handler, get_job_handler, job_details_handler, job_result_handler,
    jobs_changes_handler, list_jobs_handler, patch_job_handler,
};
pub use lifecycle::{
    delete_job_handler, pause_job_handler, restart_job_handler, resume_job_handler,
};
pub use queue::queue_handler;
pub use responses::JobResponse;
pub use storage::{
    storage_delete_batch_handler, storage_delete_handler, storage_download_handler,
    storage_exists_handler, storage_list_handler, storage_upload_handler,
    storage_upload_text_handler,
};
pub use tree::{
    create_node_handler, delete_node_handler, get_node_handler, list_node_files_handler,
    list_nodes_handler, register_node_file_handler,
};
