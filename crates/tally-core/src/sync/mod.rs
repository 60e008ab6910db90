//! Local-to-remote sync core.
//!
//! Local writes land in the [`LocalStore`](crate::services::LocalStore) first. Once
//! the signed-in user's credentials resolve, the [`SyncOrchestrator`] opens a
//! [`SyncSession`] on that user's partition and the [`MergeEngine`] pushes every
//! record changed since the last [`Watermark`].

mod connector;
mod credentials;
mod ledger;
mod merge;
mod orchestrator;
mod remote;
mod scheduler;
mod token;
mod watermark;

#[cfg(test)]
mod testing;

pub use connector::{ManagedRemoteConnector, RemoteConnector, RemoteSessionError};
pub use credentials::{CredentialResolver, Credentials, StoredSessionResolver};
pub use ledger::{ModelUpdate, ModelUpdateLedger};
pub use merge::{KindReport, MergeEngine, MergeError, MergeReport, MergedRecord, Retention};
pub use orchestrator::{LocalStoreSource, StartOutcome, SyncError, SyncOrchestrator};
pub use remote::{PartitionKey, RemoteStore, SyncSession, UpsertOutcome};
pub use scheduler::{RetryPolicy, Scheduler, TokioScheduler};
pub use token::{SyncAuthError, SyncAuthResult, SyncToken, SyncTokenClient};
pub use watermark::{SettingsWatermarkStore, Watermark, WatermarkStore};
