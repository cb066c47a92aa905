//! Long-running broker consumer: claims queued jobs, drives the two-pass
//! pipeline, verification and artifact publication, and honors cooperative
//! pause/cancel between checkpoints.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tracing::Instrument;

use crate::application::ports::{
    ArtifactStore, ArtifactStoreError, BrokerMessage, JobBroker, JobStore, JobStoreError,
    PdfRenderer, TreeStore,
};
use crate::application::services::artifacts::{ArtifactBuilder, ArtifactError};
use crate::application::services::debounced_updater::{DebouncedUpdater, StatusSnapshot};
use crate::application::services::pipeline::{
    pass1_prepare_crops, pass2_dispatch, ControlSignal, Dispatcher, JobControl, PhaseOutcome,
    PipelineConfig, PipelineError, PipelinePhase, ProgressEvent,
};
use crate::application::services::verification::verify_and_retry;
use crate::domain::{
    AnnotationDocument, Block, EngineKind, Job, JobFileType, JobId, JobSettings, JobStatus,
    ResultRecord,
};

/// Builds the per-job backend routing from the engine selector and the job's
/// model settings. Implemented by the infrastructure OCR factory.
pub trait BackendFactory: Send + Sync {
    fn dispatcher(&self, engine: EngineKind, settings: &JobSettings) -> Dispatcher;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: u32,
    pub poll_interval: Duration,
    pub task_time_limit: Duration,
    pub max_attempts: u32,
    pub pipeline: PipelineConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            poll_interval: Duration::from_secs(10),
            task_time_limit: Duration::from_secs(3600),
            max_attempts: 3,
            pipeline: PipelineConfig::default(),
        }
    }
}

pub struct WorkerDeps {
    pub jobs: Arc<dyn JobStore>,
    pub tree: Arc<dyn TreeStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub broker: Arc<dyn JobBroker>,
    pub renderer: Arc<dyn PdfRenderer>,
    pub backends: Arc<dyn BackendFactory>,
    pub updater: Arc<DebouncedUpdater>,
}

#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error("invalid input: {0}")]
    BadInput(String),
    #[error("metadata store: {0}")]
    Store(#[from] JobStoreError),
    #[error("object store: {0}")]
    ObjectStore(#[from] ArtifactStoreError),
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("artifacts: {0}")]
    Artifacts(#[from] ArtifactError),
    #[error("job exceeded time limit")]
    Timeout,
    #[error("workspace: {0}")]
    Workspace(String),
}

impl JobError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::Store(JobStoreError::ConnectionFailed(_))
                | JobError::ObjectStore(ArtifactStoreError::UploadFailed(_))
                | JobError::ObjectStore(ArtifactStoreError::DownloadFailed(_))
        )
    }
}

enum JobRun {
    Done,
    Paused,
    Cancelled,
}

pub struct WorkerRuntime {
    deps: WorkerDeps,
    config: WorkerConfig,
    slots: Arc<Semaphore>,
}

impl WorkerRuntime {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs as usize));
        Self {
            deps,
            config,
            slots,
        }
    }

    /// Consume the broker until the process is torn down. Idle polling
    /// doubles as recovery for queued jobs whose broker message was lost.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            executors = self.config.max_concurrent_jobs,
            poll_interval_s = self.config.poll_interval.as_secs(),
            "Worker runtime started"
        );
        loop {
            match self.deps.broker.receive(self.config.poll_interval).await {
                Ok(Some(message)) => Arc::clone(&self).handle_message(message).await,
                Ok(None) => Arc::clone(&self).poll_queued().await,
                Err(e) => {
                    tracing::warn!(error = %e, "Broker receive failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_message(self: Arc<Self>, message: BrokerMessage) {
        let job_id = message.job_id;

        let job = match self.deps.jobs.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id = %job_id, "Stale message: job gone");
                let _ = self.deps.broker.ack(message).await;
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job load failed, requeueing");
                let _ = self.deps.broker.nack(message, true).await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
        };

        if job.status != JobStatus::Queued {
            tracing::debug!(job_id = %job_id, status = %job.status, "Stale message: not queued");
            let _ = self.deps.broker.ack(message).await;
            return;
        }

        let this = self;
        tokio::spawn(async move {
            let permit = match Arc::clone(&this.slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let claimed = match this
                .deps
                .jobs
                .claim_job(job_id, this.config.max_concurrent_jobs)
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => {
                    // Lost the claim race or capacity exhausted; push back.
                    let _ = this.deps.broker.nack(message, true).await;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Claim failed, requeueing");
                    let _ = this.deps.broker.nack(message, true).await;
                    return;
                }
            };

            this.execute_claimed(claimed, message, permit).await;
        });
    }

    async fn poll_queued(self: Arc<Self>) {
        let claimed = match self
            .deps
            .jobs
            .claim_next_queued(self.config.max_concurrent_jobs)
            .await
        {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Idle queue poll failed");
                return;
            }
        };

        tracing::info!(job_id = %claimed.id, "Claimed job via idle poll");
        let message = BrokerMessage {
            job_id: claimed.id,
            attempt: 0,
        };
        let this = self;
        tokio::spawn(async move {
            let permit = match Arc::clone(&this.slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            this.execute_claimed(claimed, message, permit).await;
        });
    }

    async fn execute_claimed(
        &self,
        job: Job,
        message: BrokerMessage,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let job_id = job.id;
        let span = tracing::info_span!("ocr_job", job_id = %job_id, engine = %job.engine);

        let outcome = tokio::time::timeout(
            self.config.task_time_limit,
            self.run_job(&job).instrument(span),
        )
        .await
        .unwrap_or(Err(JobError::Timeout));
        drop(permit);

        match outcome {
            Ok(JobRun::Done) => {
                let _ = self
                    .deps
                    .updater
                    .update(
                        job_id,
                        StatusSnapshot::new(JobStatus::Done)
                            .with_progress(1.0)
                            .with_message("Completed"),
                    )
                    .await;
                self.deps.updater.finish(job_id).await;
                let _ = self.deps.broker.ack(message).await;
                tracing::info!(job_id = %job_id, "Job completed");
            }
            Ok(JobRun::Paused) => {
                // The pause transition was already persisted by the API; the
                // worker just stops at the checkpoint. Resume re-queues and
                // restarts from scratch.
                self.deps.updater.finish(job_id).await;
                let _ = self.deps.broker.ack(message).await;
                tracing::info!(job_id = %job_id, "Job paused at checkpoint");
            }
            Ok(JobRun::Cancelled) => {
                self.deps.updater.finish(job_id).await;
                let _ = self.deps.broker.ack(message).await;
                tracing::info!(job_id = %job_id, "Job cancelled, workspace discarded");
            }
            Err(e) => {
                let transient = e.is_transient() && message.attempt + 1 < self.config.max_attempts;
                tracing::error!(job_id = %job_id, error = %e, transient, "Job failed");
                if transient {
                    let _ = self
                        .deps
                        .jobs
                        .compare_and_set_status(
                            job_id,
                            &[JobStatus::Processing],
                            JobStatus::Queued,
                            false,
                        )
                        .await;
                    self.deps.updater.finish(job_id).await;
                    let _ = self.deps.broker.nack(message, true).await;
                } else {
                    let _ = self
                        .deps
                        .updater
                        .update(
                            job_id,
                            StatusSnapshot::new(JobStatus::Error).with_error(e.to_string()),
                        )
                        .await;
                    self.deps.updater.finish(job_id).await;
                    let _ = self.deps.broker.ack(message).await;
                }
            }
        }
    }

    async fn run_job(&self, job: &Job) -> Result<JobRun, JobError> {
        let job_id = job.id;

        self.deps
            .updater
            .update(
                job_id,
                StatusSnapshot::new(JobStatus::Processing)
                    .with_progress(0.05)
                    .with_message("Downloading source files"),
            )
            .await?;

        let workspace = tempfile::tempdir().map_err(|e| JobError::Workspace(e.to_string()))?;

        let pdf = self.download_job_file(job_id, JobFileType::Pdf).await?;
        let blocks_raw = self.download_job_file(job_id, JobFileType::Blocks).await?;
        let blocks = parse_blocks(&blocks_raw)?;

        tracing::info!(job_id = %job_id, blocks = blocks.len(), "Source files ready");

        let settings = self
            .deps
            .jobs
            .get_settings(job_id)
            .await?
            .unwrap_or_default();
        let dispatcher = self.deps.backends.dispatcher(job.engine, &settings);

        let builder = ArtifactBuilder::new(
            Arc::clone(&self.deps.artifacts),
            Arc::clone(&self.deps.jobs),
            Arc::clone(&self.deps.tree),
        );

        if blocks.is_empty() {
            let records = HashMap::new();
            let page_dims = HashMap::new();
            builder
                .publish(job, &blocks, &records, &page_dims, &[])
                .await?;
            return Ok(JobRun::Done);
        }

        let halted = Arc::new(AtomicBool::new(false));
        let control = StoreControl {
            jobs: Arc::clone(&self.deps.jobs),
            job_id,
            halted: Arc::clone(&halted),
        };

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = spawn_progress_forwarder(
            Arc::clone(&self.deps.updater),
            job_id,
            progress_rx,
            Arc::clone(&halted),
        );

        let run = self
            .run_phases(
                job,
                &blocks,
                workspace.path(),
                &dispatcher,
                &builder,
                &pdf,
                &progress_tx,
                &control,
            )
            .await;

        drop(progress_tx);
        let _ = forwarder.await;

        // Workspace (crops, manifest, temp files) always removed.
        drop(workspace);

        run
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        job: &Job,
        blocks: &[Block],
        workspace: &Path,
        dispatcher: &Dispatcher,
        builder: &ArtifactBuilder,
        pdf: &[u8],
        progress: &mpsc::UnboundedSender<ProgressEvent>,
        control: &StoreControl,
    ) -> Result<JobRun, JobError> {
        let cfg = &self.config.pipeline;
        let renderer = self.deps.renderer.as_ref();

        let mut records: HashMap<String, ResultRecord> = blocks
            .iter()
            .map(|b| (b.id.clone(), ResultRecord::missing(&b.id)))
            .collect();

        let summary = match pass1_prepare_crops(
            renderer, pdf, blocks, workspace, cfg, progress, control,
        )
        .await?
        {
            PhaseOutcome::Completed(summary) => summary,
            PhaseOutcome::Interrupted(signal) => return Ok(signal_to_run(signal)),
        };
        for record in &summary.degenerate {
            records.insert(record.block_id.clone(), record.clone());
        }

        match control.checkpoint().await {
            ControlSignal::Continue => {}
            signal => return Ok(signal_to_run(signal)),
        }

        match pass2_dispatch(
            renderer,
            pdf,
            &job.document_name,
            blocks,
            &summary.manifest_path,
            dispatcher,
            cfg,
            &mut records,
            progress,
            control,
        )
        .await?
        {
            PhaseOutcome::Completed(()) => {}
            PhaseOutcome::Interrupted(signal) => return Ok(signal_to_run(signal)),
        }

        match verify_and_retry(
            renderer,
            pdf,
            &job.document_name,
            blocks,
            dispatcher,
            cfg,
            &mut records,
            progress,
            control,
        )
        .await?
        {
            PhaseOutcome::Completed(()) => {}
            PhaseOutcome::Interrupted(signal) => return Ok(signal_to_run(signal)),
        }

        crate::application::services::pipeline::send_progress(
            progress,
            PipelinePhase::Publish,
            0.0,
            "Publishing artifacts",
        );

        let mut page_dims: HashMap<u32, (f64, f64)> = HashMap::new();
        for block in blocks {
            if let std::collections::hash_map::Entry::Vacant(entry) =
                page_dims.entry(block.page_index)
            {
                match renderer.page_size(pdf, block.page_index).await {
                    Ok(dims) => {
                        entry.insert(dims);
                    }
                    Err(e) => {
                        tracing::warn!(page = block.page_index, error = %e, "Page size lookup failed");
                    }
                }
            }
        }

        let annotation: AnnotationDocument = builder
            .publish(job, blocks, &records, &page_dims, &summary.crop_pdfs)
            .await?;

        tracing::debug!(
            job_id = %job.id,
            blocks = annotation.block_count(),
            "Annotation assembled"
        );

        Ok(JobRun::Done)
    }

    async fn download_job_file(
        &self,
        job_id: JobId,
        file_type: JobFileType,
    ) -> Result<bytes::Bytes, JobError> {
        let file = self
            .deps
            .jobs
            .get_job_file(job_id, file_type)
            .await?
            .ok_or_else(|| JobError::BadInput(format!("{file_type} file not registered")))?;
        Ok(self.deps.artifacts.download(&file.object_key).await?)
    }
}

fn signal_to_run(signal: ControlSignal) -> JobRun {
    match signal {
        ControlSignal::Pause => JobRun::Paused,
        _ => JobRun::Cancelled,
    }
}

/// `blocks.json` is a bare block list; drafts carry a version-2 annotation
/// document instead. Accept both.
fn parse_blocks(raw: &[u8]) -> Result<Vec<Block>, JobError> {
    if let Ok(blocks) = serde_json::from_slice::<Vec<Block>>(raw) {
        return Ok(blocks);
    }
    let annotation: AnnotationDocument = serde_json::from_slice(raw)
        .map_err(|e| JobError::BadInput(format!("unparseable blocks payload: {e}")))?;
    Ok(annotation
        .pages
        .into_iter()
        .flat_map(|p| p.blocks.into_iter().map(|b| b.block))
        .collect())
}

/// Cooperative pause/cancel: the authoritative signal is the job row itself.
struct StoreControl {
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    halted: Arc<AtomicBool>,
}

#[async_trait]
impl JobControl for StoreControl {
    async fn checkpoint(&self) -> ControlSignal {
        match self.jobs.get_job(self.job_id).await {
            Ok(Some(job)) => match job.status {
                JobStatus::Paused => {
                    self.halted.store(true, Ordering::SeqCst);
                    ControlSignal::Pause
                }
                _ => ControlSignal::Continue,
            },
            Ok(None) => {
                self.halted.store(true, Ordering::SeqCst);
                ControlSignal::Cancel
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Checkpoint read failed");
                ControlSignal::Continue
            }
        }
    }
}

/// Maps phase-relative progress onto the job's global progress window and
/// feeds the debounced updater. Stops writing once the job was paused or
/// cancelled so a stale event cannot clobber the terminal status.
fn spawn_progress_forwarder(
    updater: Arc<DebouncedUpdater>,
    job_id: JobId,
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    halted: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if halted.load(Ordering::SeqCst) {
                continue;
            }
            let fraction = match event.phase {
                PipelinePhase::RenderCrops => 0.1 + 0.3 * event.fraction,
                PipelinePhase::Dispatch => 0.4 + 0.5 * event.fraction,
                PipelinePhase::Verify => 0.9 + 0.05 * event.fraction,
                PipelinePhase::Publish => 0.95 + 0.04 * event.fraction,
            };
            let snapshot = StatusSnapshot::new(JobStatus::Processing)
                .with_progress(fraction)
                .with_message(event.message);
            if let Err(e) = updater.update(job_id, snapshot).await {
                tracing::warn!(job_id = %job_id, error = %e, "Progress write failed");
            }
        }
    })
}
