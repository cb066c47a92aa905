use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::ports::{JobStore, JobStoreError, JobStatusUpdate};
use crate::domain::{JobId, JobStatus};

/// One coalesced status/progress write.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    pub progress: Option<f32>,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
}

impl StatusSnapshot {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            status_message: None,
            error_message: None,
        }
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    fn into_update(self) -> JobStatusUpdate {
        JobStatusUpdate {
            status: Some(self.status),
            progress: self.progress,
            status_message: self.status_message,
            error_message: self.error_message,
        }
    }
}

struct UpdateState {
    last_flush: Option<Instant>,
    last_status: Option<JobStatus>,
    pending: Option<StatusSnapshot>,
    flushed: u64,
    suppressed: u64,
}

impl UpdateState {
    fn new() -> Self {
        Self {
            last_flush: None,
            last_status: None,
            pending: None,
            flushed: 0,
            suppressed: 0,
        }
    }
}

/// Coalesces high-frequency progress writes into durable snapshots.
///
/// A write goes straight through when the status changed, the status is
/// terminal, or the debounce interval has elapsed; otherwise it is buffered
/// and picked up by the ticker. At most one write per interval for
/// non-terminal updates; no status change is ever lost; intermediate
/// progress values may be dropped.
pub struct DebouncedUpdater {
    store: Arc<dyn JobStore>,
    interval: Duration,
    states: Mutex<HashMap<JobId, UpdateState>>,
}

impl DebouncedUpdater {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether the write reached the store (false = buffered).
    pub async fn update(
        &self,
        job_id: JobId,
        snapshot: StatusSnapshot,
    ) -> Result<bool, JobStoreError> {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        let state = states.entry(job_id).or_insert_with(UpdateState::new);

        let status_changed = state.last_status != Some(snapshot.status);
        let elapsed = state
            .last_flush
            .map(|t| now.duration_since(t))
            .unwrap_or(self.interval);

        let should_flush =
            snapshot.status.is_terminal() || status_changed || elapsed >= self.interval;

        if should_flush {
            Self::flush_snapshot(&self.store, state, job_id, snapshot, now).await?;
            Ok(true)
        } else {
            state.pending = Some(snapshot);
            state.suppressed += 1;
            Ok(false)
        }
    }

    async fn flush_snapshot(
        store: &Arc<dyn JobStore>,
        state: &mut UpdateState,
        job_id: JobId,
        snapshot: StatusSnapshot,
        now: Instant,
    ) -> Result<(), JobStoreError> {
        let status = snapshot.status;
        store.update_job(job_id, snapshot.into_update()).await?;
        state.last_flush = Some(now);
        state.last_status = Some(status);
        state.pending = None;
        state.flushed += 1;
        Ok(())
    }

    /// Flush the pending snapshot of one job, if any.
    pub async fn flush(&self, job_id: JobId) -> Result<bool, JobStoreError> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&job_id) {
            if let Some(pending) = state.pending.take() {
                Self::flush_snapshot(&self.store, state, job_id, pending, Instant::now()).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flush every pending snapshot that has aged past the interval.
    pub async fn flush_stale(&self) {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        for (job_id, state) in states.iter_mut() {
            let stale = state
                .last_flush
                .map(|t| now.duration_since(t) >= self.interval)
                .unwrap_or(true);
            if stale && state.pending.is_some() {
                if let Some(pending) = state.pending.take() {
                    if let Err(e) =
                        Self::flush_snapshot(&self.store, state, *job_id, pending, now).await
                    {
                        tracing::warn!(job_id = %job_id, error = %e, "Debounced flush failed");
                    }
                }
            }
        }
    }

    /// Drain everything; called on shutdown.
    pub async fn flush_all(&self) {
        let mut states = self.states.lock().await;
        for (job_id, state) in states.iter_mut() {
            if let Some(pending) = state.pending.take() {
                if let Err(e) =
                    Self::flush_snapshot(&self.store, state, *job_id, pending, Instant::now()).await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "Shutdown flush failed");
                }
            }
        }
    }

    /// Final flush + state removal for a finished job; logs write reduction.
    pub async fn finish(&self, job_id: JobId) {
        let removed = {
            let mut states = self.states.lock().await;
            states.remove(&job_id)
        };
        if let Some(mut state) = removed {
            if let Some(pending) = state.pending.take() {
                if let Err(e) = Self::flush_snapshot(
                    &self.store,
                    &mut state,
                    job_id,
                    pending,
                    Instant::now(),
                )
                .await
                {
                    tracing::warn!(job_id = %job_id, error = %e, "Final flush failed");
                }
            }
            tracing::debug!(
                job_id = %job_id,
                flushed = state.flushed,
                suppressed = state.suppressed,
                "Status updater drained"
            );
        }
    }

    /// Background ticker that sweeps stale pending snapshots.
    pub fn spawn_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let updater = self;
        let period = updater.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                updater.flush_stale().await;
            }
        })
    }
}
