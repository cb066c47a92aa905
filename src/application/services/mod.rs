mod admission;
mod artifacts;
mod debounced_updater;
mod matcher;
mod prompts;
mod rate_limiter;
mod verification;
mod worker;

pub mod pipeline;

pub use admission::{AdmissionController, AdmissionError, QueueDepth};
pub use artifacts::{
    build_annotation, build_result_markdown, build_result_zip, ArtifactBuilder, ArtifactError,
};
pub use debounced_updater::{DebouncedUpdater, StatusSnapshot};
pub use matcher::{match_response_id, parse_batch_response, strip_block_markers, MatchQuality};
pub use prompts::{build_image_prompt, build_single_block_prompt, build_strip_prompt, PromptVars};
pub use rate_limiter::{RateLimitPermit, RateLimiter};
pub use verification::verify_and_retry;
pub use worker::{BackendFactory, WorkerConfig, WorkerDeps, WorkerRuntime};
