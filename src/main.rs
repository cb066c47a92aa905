use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use varberg::application::ports::{ArtifactStore, JobBroker, JobStore, TreeStore};
use varberg::application::services::{
    AdmissionController, DebouncedUpdater, RateLimiter, WorkerDeps, WorkerRuntime,
};
use varberg::infrastructure::broker::ChannelBroker;
use varberg::infrastructure::observability::{init_tracing, TracingConfig};
use varberg::infrastructure::ocr::OcrBackendFactory;
use varberg::infrastructure::pdf::PdfiumRenderer;
use varberg::infrastructure::persistence::{MemoryMetadataStore, PgJobStore, PgTreeStore};
use varberg::infrastructure::storage::{
    LocalArtifactStore, MemoryArtifactStore, S3ArtifactStore,
};
use varberg::presentation::config::{Settings, StorageBackendKind};
use varberg::presentation::{create_router, AppState};

struct Stores {
    jobs: Arc<dyn JobStore>,
    tree: Arc<dyn TreeStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    init_tracing(TracingConfig {
        json_format: settings.log_json,
    });

    let stores = match connect_stores(&settings).await {
        Ok(stores) => stores,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Infrastructure unavailable at boot");
            return ExitCode::from(2);
        }
    };

    match serve(settings, stores).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Server terminated abnormally");
            ExitCode::from(1)
        }
    }
}

async fn connect_stores(settings: &Settings) -> anyhow::Result<Stores> {
    let (jobs, tree): (Arc<dyn JobStore>, Arc<dyn TreeStore>) = match &settings.database_url {
        Some(url) => {
            let pool = PgJobStore::connect(
                url,
                settings.database_max_connections,
                settings.database_connect_retries,
            )
            .await
            .context("metadata store unreachable")?;
            PgJobStore::migrate(&pool)
                .await
                .context("job schema migration failed")?;
            PgTreeStore::migrate(&pool)
                .await
                .context("tree schema migration failed")?;
            (
                Arc::new(PgJobStore::new(pool.clone())),
                Arc::new(PgTreeStore::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory metadata store");
            let store = Arc::new(MemoryMetadataStore::new());
            (store.clone() as Arc<dyn JobStore>, store as Arc<dyn TreeStore>)
        }
    };

    let artifacts: Arc<dyn ArtifactStore> = match settings.storage_backend {
        StorageBackendKind::S3 => Arc::new(
            S3ArtifactStore::new(&settings.s3_config()).context("object store unreachable")?,
        ),
        StorageBackendKind::Local => Arc::new(
            LocalArtifactStore::new(PathBuf::from(&settings.storage_local_path))
                .context("local storage unavailable")?,
        ),
        StorageBackendKind::Memory => Arc::new(MemoryArtifactStore::new()),
    };

    Ok(Stores {
        jobs,
        tree,
        artifacts,
    })
}

async fn serve(settings: Arc<Settings>, stores: Stores) -> anyhow::Result<()> {
    let Stores {
        jobs,
        tree,
        artifacts,
    } = stores;

    let broker: Arc<dyn JobBroker> = Arc::new(ChannelBroker::new());
    let admission = Arc::new(AdmissionController::new(
        Arc::clone(&jobs),
        settings.max_queue_size,
    ));

    let updater = Arc::new(DebouncedUpdater::new(
        Arc::clone(&jobs),
        Duration::from_secs_f64(settings.debounce_interval_s),
    ));
    let updater_ticker = Arc::clone(&updater).spawn_ticker();

    // Global ceiling across all jobs; Backend B gets its own provider policy.
    let global_limiter = Arc::new(RateLimiter::new(
        "global_ocr",
        u32::MAX,
        settings.max_global_ocr_requests,
    ));
    let segmentation_limiter = Arc::new(RateLimiter::new(
        "backend_b",
        settings.backend_b_max_rpm,
        settings.backend_b_max_concurrent,
    ));
    let backends = Arc::new(OcrBackendFactory::new(
        settings.backend_config(),
        global_limiter,
        segmentation_limiter,
    ));

    let worker = Arc::new(WorkerRuntime::new(
        WorkerDeps {
            jobs: Arc::clone(&jobs),
            tree: Arc::clone(&tree),
            artifacts: Arc::clone(&artifacts),
            broker: Arc::clone(&broker),
            renderer: Arc::new(PdfiumRenderer::new()),
            backends,
            updater: Arc::clone(&updater),
        },
        settings.worker_config(),
    ));
    let worker_task = tokio::spawn(Arc::clone(&worker).run());

    let state = AppState {
        jobs,
        tree,
        artifacts,
        broker,
        admission,
        settings: Arc::clone(&settings),
    };
    let router = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "Remote OCR server listening");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error");

    // Drain pending status writes before exit.
    updater.flush_all().await;
    updater_ticker.abort();
    worker_task.abort();

    serve_result
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
