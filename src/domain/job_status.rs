use std::fmt;
use std::str::FromStr;

/// Job lifecycle state. Wire strings are lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Draft,
    Queued,
    Processing,
    Done,
    Error,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Paused => "paused",
        }
    }

    /// Terminal statuses force-flush the debounced updater.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Paused)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(JobStatus::Draft),
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "error" => Ok(JobStatus::Error),
            "paused" => Ok(JobStatus::Paused),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    StartDraft,
    Claim,
    Pause,
    Resume,
    Restart,
    Complete,
    Fail,
    Cancel,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::StartDraft => "start_draft",
            JobEvent::Claim => "claim",
            JobEvent::Pause => "pause",
            JobEvent::Resume => "resume",
            JobEvent::Restart => "restart",
            JobEvent::Complete => "complete",
            JobEvent::Fail => "fail",
            JobEvent::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from} + {event}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl JobStatus {
    /// Apply an event to the state machine. `Ok(None)` means the job row is
    /// removed (cancel); any pairing outside the transition table is rejected
    /// without mutating state.
    pub fn apply(self, event: JobEvent) -> Result<Option<JobStatus>, InvalidTransition> {
        use JobEvent::*;
        use JobStatus::*;

        let next = match (self, event) {
            (Draft, StartDraft) => Some(Queued),
            (Queued, Claim) => Some(Processing),
            (Queued, Pause) => Some(Paused),
            (Queued, Cancel) => None,
            (Processing, Complete) => Some(Done),
            (Processing, Fail) => Some(Error),
            (Processing, Pause) => Some(Paused),
            (Processing, Cancel) => None,
            (Paused, Resume) => Some(Queued),
            (Paused, Cancel) => None,
            (Done, Cancel) => None,
            (Error, Restart) => Some(Queued),
            (Error, Cancel) => None,
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.as_str(),
                    event: event.as_str(),
                });
            }
        };
        Ok(next)
    }
}
