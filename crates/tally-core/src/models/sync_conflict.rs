//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::ModelKind;

/// A remote write rejected by last-write-wins resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Kind of the record involved
    pub kind: ModelKind,
    /// Record involved in the conflict
    pub record_id: String,
    /// Remote row's timestamp when the conflict occurred
    pub existing_updated_at: i64,
    /// Incoming row's timestamp that was rejected
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
