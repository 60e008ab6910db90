//! Sync lifecycle states shared with app shells.

use std::fmt;

use crate::sync::ModelUpdateLedger;

/// Where the orchestrator is in its run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    ResolvingCredentials,
    OpeningSession,
    Merging,
    Completed,
    RetryScheduled,
    /// Terminal for this app session: incompatible local store or retries exhausted
    Failed,
}

/// Inputs that move the orchestrator between phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    Start,
    CredentialsResolved,
    CredentialsAbsent,
    StoreUnavailable,
    StoreIncompatible,
    SessionOpened,
    SessionFailed,
    MergeSucceeded,
    MergeFailed,
    RetryElapsed,
    RetriesExhausted,
    /// Retries ran out on a pass after an earlier one completed
    PassGivenUp,
    Logout,
}

impl SyncPhase {
    /// Phase after `event`; events that make no sense in the current phase leave it unchanged.
    #[must_use]
    pub const fn on(self, event: SyncEvent) -> Self {
        use SyncEvent as E;

        match (self, event) {
            (_, E::Logout) => Self::Idle,
            (Self::Idle | Self::Completed, E::Start) | (Self::RetryScheduled, E::RetryElapsed) => {
                Self::ResolvingCredentials
            }
            (Self::ResolvingCredentials, E::CredentialsResolved) => Self::OpeningSession,
            (Self::ResolvingCredentials, E::CredentialsAbsent | E::StoreUnavailable)
            | (Self::OpeningSession, E::SessionFailed)
            | (Self::Merging, E::MergeFailed) => Self::RetryScheduled,
            (Self::ResolvingCredentials, E::StoreIncompatible)
            | (Self::RetryScheduled, E::RetriesExhausted) => Self::Failed,
            (Self::RetryScheduled, E::PassGivenUp) => Self::Idle,
            (Self::OpeningSession, E::SessionOpened) => Self::Merging,
            (Self::Merging, E::MergeSucceeded) => Self::Completed,
            (phase, _) => phase,
        }
    }

    /// Whether a run is between start and its next resting phase.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::ResolvingCredentials | Self::OpeningSession | Self::Merging | Self::RetryScheduled
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResolvingCredentials => "resolving_credentials",
            Self::OpeningSession => "opening_session",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::RetryScheduled => "retry_scheduled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot published to observers on every phase change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Sticky until logout once a pass has completed
    pub completed: bool,
    pub consecutive_failures: u32,
    /// Set once failures reach the configured stall threshold
    pub stalled: bool,
    pub last_error: Option<String>,
    /// Unix ms
    pub last_completed_at: Option<i64>,
    /// Unix ms
    pub next_retry_at: Option<i64>,
    /// Kinds changed by completed passes this app session
    pub ledger: ModelUpdateLedger,
}

/// What the UI shows for sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Working from local data only, sync still pending
    NotSynced,
    Synced,
    /// Still retrying, but failing for a while; also a failing pass after a completed one
    Stalled,
    /// Needs user action (e.g. local data reset)
    Failed,
}

impl From<&SyncStatus> for SyncState {
    fn from(status: &SyncStatus) -> Self {
        let failed = status.phase == SyncPhase::Failed;
        if status.completed {
            if failed || status.stalled {
                Self::Stalled
            } else {
                Self::Synced
            }
        } else if failed {
            Self::Failed
        } else if status.stalled {
            Self::Stalled
        } else {
            Self::NotSynced
        }
    }
}
