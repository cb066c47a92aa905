use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use varberg::application::ports::{ArtifactStore, JobBroker, JobStore, TreeStore};
use varberg::application::services::AdmissionController;
use varberg::domain::{
    Block, BlockType, EngineKind, Job, JobFile, JobFileType, JobStatus, NodeFile, ShapeType,
};
use varberg::infrastructure::broker::ChannelBroker;
use varberg::infrastructure::persistence::MemoryMetadataStore;
use varberg::infrastructure::storage::MemoryArtifactStore;
use varberg::presentation::config::{Settings, StorageBackendKind};
use varberg::presentation::{create_router, AppState};

fn test_settings() -> Settings {
    Settings {
        server_port: 0,
        api_key: None,
        log_json: false,
        database_url: None,
        database_max_connections: 2,
        database_connect_retries: 1,
        storage_backend: StorageBackendKind::Memory,
        storage_local_path: String::new(),
        s3_endpoint: String::new(),
        s3_region: "auto".to_string(),
        s3_bucket: String::new(),
        s3_access_key_id: String::new(),
        s3_secret_access_key: String::new(),
        max_concurrent_jobs: 4,
        ocr_threads_per_job: 2,
        max_global_ocr_requests: 8,
        pdf_render_dpi: 72,
        max_queue_size: 100,
        debounce_interval_s: 0.05,
        poll_interval_s: 1,
        task_time_limit_s: 60,
        backend_b_max_rpm: 180,
        backend_b_max_concurrent: 5,
        strip_merge_gap_px: 20,
        strip_max_height_px: 6000,
        fuzzy_threshold: 2,
        presign_expiry_s: 3600,
        default_engine: EngineKind::Echo,
        vision_api_key: String::new(),
        vision_base_url: String::new(),
        segmentation_api_key: String::new(),
        segmentation_base_url: String::new(),
        default_text_model: "test-model".to_string(),
        default_image_model: "test-model".to_string(),
        default_stamp_model: "test-model".to_string(),
    }
}

struct TestApp {
    router: Router,
    meta: Arc<MemoryMetadataStore>,
    artifacts: Arc<MemoryArtifactStore>,
    broker: Arc<ChannelBroker>,
}

fn build_app(settings: Settings) -> TestApp {
    let meta = Arc::new(MemoryMetadataStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let broker = Arc::new(ChannelBroker::new());
    let settings = Arc::new(settings);

    let admission = Arc::new(AdmissionController::new(
        meta.clone() as Arc<dyn JobStore>,
        settings.max_queue_size,
    ));

    let state = AppState {
        jobs: meta.clone() as Arc<dyn JobStore>,
        tree: meta.clone() as Arc<dyn TreeStore>,
        artifacts: artifacts.clone() as Arc<dyn ArtifactStore>,
        broker: broker.clone() as Arc<dyn JobBroker>,
        admission,
        settings,
    };

    TestApp {
        router: create_router(state),
        meta,
        artifacts,
        broker,
    }
}

fn sample_blocks_json() -> Vec<u8> {
    let blocks = vec![
        Block {
            id: "AAAA-BBBB-001".to_string(),
            page_index: 0,
            block_type: BlockType::Text,
            shape_type: ShapeType::Rectangle,
            coords_px: [61.0, 100.0, 551.0, 180.0],
            coords_norm: [0.1, 0.126, 0.9, 0.227],
            polygon_points: None,
            hint: None,
            category: None,
            group_id: None,
        },
        Block {
            id: "AAAA-BBBB-003".to_string(),
            page_index: 1,
            block_type: BlockType::Image,
            shape_type: ShapeType::Rectangle,
            coords_px: [122.0, 300.0, 367.0, 500.0],
            coords_norm: [0.2, 0.378, 0.6, 0.631],
            polygon_points: None,
            hint: None,
            category: None,
            group_id: Some("figures".to_string()),
        },
    ];
    serde_json::to_vec(&blocks).unwrap()
}

fn multipart_request(uri: &str, fields: &[(&str, Option<&str>, Vec<u8>)]) -> Request<Body> {
    let boundary = "xX-test-boundary-Xx";
    let mut body: Vec<u8> = Vec::new();
    for (name, filename, content) in fields {
        body.extend(format!("--{boundary}\r\n").bytes());
        match filename {
            Some(filename) => body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .bytes(),
            ),
            None => body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").bytes(),
            ),
        }
        body.extend(content);
        body.extend(b"\r\n");
    }
    body.extend(format!("--{boundary}--\r\n").bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn create_job_request(task_name: &str) -> Request<Body> {
    multipart_request(
        "/jobs",
        &[
            ("client_id", None, b"client-1".to_vec()),
            ("document_id", None, b"doc-hash-1".to_vec()),
            ("document_name", None, b"contract.pdf".to_vec()),
            ("task_name", None, task_name.as_bytes().to_vec()),
            ("engine", None, b"echo".to_vec()),
            ("text_model", None, b"model-t".to_vec()),
            ("table_model", None, b"model-tb".to_vec()),
            ("image_model", None, b"model-i".to_vec()),
            ("pdf", Some("contract.pdf"), b"%PDF-1.4 fake".to_vec()),
            ("blocks_file", Some("blocks.json"), sample_blocks_json()),
        ],
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_empty(router: &Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn health_answers_without_api_key() {
    let mut settings = test_settings();
    settings.api_key = Some("secret".to_string());
    let app = build_app(settings);

    let response = get(&app.router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);
}

#[tokio::test]
async fn given_configured_api_key_then_other_routes_require_it() {
    let mut settings = test_settings();
    settings.api_key = Some("secret".to_string());
    let app = build_app(settings);

    let response = get(&app.router, "/jobs").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("X-API-Key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_job_stages_inputs_and_publishes() {
    let app = build_app(test_settings());

    let response = app.router.clone().oneshot(create_job_request("run 1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["engine"], "echo");

    let prefix = body["artifact_prefix"].as_str().unwrap();
    for suffix in ["document.pdf", "blocks.json"] {
        let key = format!("{prefix}/{suffix}");
        assert!(app.artifacts.exists(&key).await.unwrap(), "missing {key}");
    }

    let message = app
        .broker
        .receive(Duration::from_millis(100))
        .await
        .unwrap()
        .expect("broker should carry the new job");
    assert_eq!(message.job_id.to_string(), body["id"].as_str().unwrap());

    let settings = app
        .meta
        .get_settings(message.job_id)
        .await
        .unwrap()
        .expect("settings persisted");
    assert_eq!(settings.text_model, "model-t");
    assert_eq!(settings.image_model, "model-i");
}

/// S2: with max_queue_size = 2, the third rapid create is rejected.
#[tokio::test]
async fn given_saturated_queue_then_create_rejected_with_queue_full() {
    let mut settings = test_settings();
    settings.max_queue_size = 2;
    let app = build_app(settings);

    for task in ["j1", "j2"] {
        let response = app.router.clone().oneshot(create_job_request(task)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{task} should be admitted");
    }

    let response = app.router.clone().oneshot(create_job_request("j3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["error"], "queue_full");

    let depth = get(&app.router, "/queue").await;
    let depth = body_json(depth).await;
    assert_eq!(depth["queued"], 2);
    assert_eq!(depth["processing"], 0);
    assert_eq!(depth["max"], 2);
}

#[tokio::test]
async fn unknown_and_malformed_job_ids_are_rejected() {
    let app = build_app(test_settings());

    let response = get(&app.router, "/jobs/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(
        &app.router,
        "/jobs/00000000-0000-4000-8000-000000000000",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

async fn insert_job(app: &TestApp, status: JobStatus) -> Job {
    let job = Job::new(
        "client-1".to_string(),
        "doc-hash-1".to_string(),
        "contract.pdf".to_string(),
        "run".to_string(),
        EngineKind::Echo,
        status,
        None,
    );
    app.meta.insert_job(&job).await.unwrap();
    job
}

#[tokio::test]
async fn given_done_job_then_pause_is_an_invalid_transition() {
    let app = build_app(test_settings());
    let job = insert_job(&app, JobStatus::Done).await;

    let response = post_empty(&app.router, &format!("/jobs/{}/pause", job.id)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "invalid_transition");

    let stored = app.meta.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Done, "state must not mutate");
}

#[tokio::test]
async fn pause_resume_cycle_requeues_the_job() {
    let app = build_app(test_settings());
    let job = insert_job(&app, JobStatus::Queued).await;

    let response = post_empty(&app.router, &format!("/jobs/{}/pause", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "paused");

    let response = post_empty(&app.router, &format!("/jobs/{}/resume", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "queued");

    // Resume re-publishes the job for workers.
    let message = app.broker.receive(Duration::from_millis(100)).await.unwrap();
    assert_eq!(message.map(|m| m.job_id), Some(job.id));
}

#[tokio::test]
async fn restart_resets_error_state() {
    let app = build_app(test_settings());
    let job = insert_job(&app, JobStatus::Error).await;
    app.meta
        .update_job(
            job.id,
            varberg::application::ports::JobStatusUpdate::default()
                .with_progress(0.7)
                .with_error("backend exploded"),
        )
        .await
        .unwrap();

    let response = post_empty(&app.router, &format!("/jobs/{}/restart", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.meta.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.progress, 0.0);
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn result_url_requires_done_status_and_registered_artifact() {
    let app = build_app(test_settings());
    let queued = insert_job(&app, JobStatus::Queued).await;

    let response = get(&app.router, &format!("/jobs/{}/result", queued.id)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "not_ready");

    let done = insert_job(&app, JobStatus::Done).await;
    let response = get(&app.router, &format!("/jobs/{}/result", done.id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let key = format!("{}/result.zip", done.artifact_prefix);
    app.artifacts
        .upload(&key, bytes::Bytes::from_static(b"zip"))
        .await
        .unwrap();
    app.meta
        .append_job_file(&JobFile::new(
            done.id,
            JobFileType::ResultZip,
            &key,
            "result.zip",
            3,
        ))
        .await
        .unwrap();

    let response = get(&app.router, &format!("/jobs/{}/result", done.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["file_name"], "result.zip");
    assert!(body["download_url"].as_str().unwrap().contains("result.zip"));
}

#[tokio::test]
async fn delete_cascades_to_job_files_but_not_node_files() {
    let app = build_app(test_settings());
    let node = app.meta.create_node("project", None).await.unwrap();

    let job = Job::new(
        "client-1".to_string(),
        "doc-hash-1".to_string(),
        "contract.pdf".to_string(),
        "run".to_string(),
        EngineKind::Echo,
        JobStatus::Done,
        Some(node.id.clone()),
    );
    app.meta.insert_job(&job).await.unwrap();

    let key = format!("{}/result.md", job.artifact_prefix);
    app.artifacts
        .upload(&key, bytes::Bytes::from_static(b"# md"))
        .await
        .unwrap();
    app.meta
        .append_job_file(&JobFile::new(job.id, JobFileType::ResultMd, &key, "result.md", 4))
        .await
        .unwrap();
    app.meta
        .register_node_file(&NodeFile {
            node_id: node.id.clone(),
            file_type: "result_md".to_string(),
            object_key: key.clone(),
            file_name: "result.md".to_string(),
            size: 4,
        })
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/jobs/{}", job.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(app.meta.get_job(job.id).await.unwrap().is_none());
    assert!(app.meta.list_job_files(job.id).await.unwrap().is_empty());
    assert!(!app.artifacts.exists(&key).await.unwrap());
    // Node files survive job deletion by design.
    assert_eq!(app.meta.list_node_files(&node.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn changes_feed_filters_by_timestamp() {
    let app = build_app(test_settings());
    insert_job(&app, JobStatus::Queued).await;

    let past = "2000-01-01T00:00:00Z";
    let response = get(&app.router, &format!("/jobs/changes?since={past}")).await;
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let future = "2100-01-01T00:00:00Z";
    let response = get(&app.router, &format!("/jobs/changes?since={future}")).await;
    let body = body_json(response).await;
    assert!(body.as_array().unwrap().is_empty());

    let response = get(&app.router, "/jobs/changes?since=yesterday").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn draft_flow_creates_then_starts() {
    let app = build_app(test_settings());

    let request = multipart_request(
        "/jobs/draft",
        &[
            ("client_id", None, b"client-1".to_vec()),
            ("document_id", None, b"doc-hash-1".to_vec()),
            ("document_name", None, b"contract.pdf".to_vec()),
            ("engine", None, b"echo".to_vec()),
            ("pdf", Some("contract.pdf"), b"%PDF-1.4 fake".to_vec()),
            (
                "annotation_json",
                Some("annotation.json"),
                sample_blocks_json(),
            ),
        ],
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "draft");
    let id = body["id"].as_str().unwrap().to_string();

    // Drafts are not published to the broker.
    assert!(app
        .broker
        .receive(Duration::from_millis(50))
        .await
        .unwrap()
        .is_none());

    let start = Request::builder()
        .method("POST")
        .uri(format!("/jobs/{id}/start"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("engine=echo&text_model=model-t"))
        .unwrap();
    let response = app.router.clone().oneshot(start).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "queued");

    let message = app.broker.receive(Duration::from_millis(100)).await.unwrap();
    assert!(message.is_some());

    // Starting twice is an invalid transition.
    let start_again = Request::builder()
        .method("POST")
        .uri(format!("/jobs/{id}/start"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("engine=echo"))
        .unwrap();
    let response = app.router.clone().oneshot(start_again).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn patch_renames_the_task() {
    let app = build_app(test_settings());
    let job = insert_job(&app, JobStatus::Queued).await;

    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/jobs/{}", job.id))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("task_name=renamed+run"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["task_name"], "renamed run");
}

#[tokio::test]
async fn job_details_expose_stats_settings_and_artifacts() {
    let app = build_app(test_settings());

    let response = app.router.clone().oneshot(create_job_request("run")).await.unwrap();
    let body = body_json(response).await;
    let id = body["id"].as_str().unwrap();

    let response = get(&app.router, &format!("/jobs/{id}/details")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let details = body_json(response).await;

    assert_eq!(details["block_stats"]["total"], 2);
    assert_eq!(details["block_stats"]["text"], 1);
    assert_eq!(details["block_stats"]["image"], 1);
    assert_eq!(details["block_stats"]["grouped"], 1);
    assert_eq!(details["settings"]["text_model"], "model-t");

    let artifacts = details["artifacts"].as_array().unwrap();
    let types: Vec<&str> = artifacts
        .iter()
        .map(|a| a["file_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"pdf"));
    assert!(types.contains(&"blocks"));
}

#[tokio::test]
async fn storage_proxy_round_trip() {
    let app = build_app(test_settings());

    let upload = Request::builder()
        .method("POST")
        .uri("/api/storage/upload/shared/notes.txt")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.router.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&app.router, "/api/storage/exists/shared/notes.txt").await;
    assert_eq!(body_json(response).await["exists"], true);

    let response = get(&app.router, "/api/storage/list/shared").await;
    let body = body_json(response).await;
    assert_eq!(body["keys"].as_array().unwrap().len(), 1);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/storage/delete/shared/notes.txt")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&app.router, "/api/storage/exists/shared/notes.txt").await;
    assert_eq!(body_json(response).await["exists"], false);
}

#[tokio::test]
async fn tree_proxy_manages_nodes_and_files() {
    let app = build_app(test_settings());

    let create = Request::builder()
        .method("POST")
        .uri("/api/tree/nodes")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name": "projects"}"#))
        .unwrap();
    let response = app.router.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let node = body_json(response).await;
    let node_id = node["id"].as_str().unwrap();

    let register = Request::builder()
        .method("POST")
        .uri(format!("/api/tree/nodes/{node_id}/files"))
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"file_type": "pdf", "object_key": "tree/doc.pdf", "file_name": "doc.pdf", "size": 10}"#,
        ))
        .unwrap();
    let response = app.router.clone().oneshot(register).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(&app.router, &format!("/api/tree/nodes/{node_id}/files")).await;
    let files = body_json(response).await;
    assert_eq!(files.as_array().unwrap().len(), 1);
    assert_eq!(files[0]["object_key"], "tree/doc.pdf");
}
