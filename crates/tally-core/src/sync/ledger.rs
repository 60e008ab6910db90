//! Per-kind "last merged at" bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::ModelKind;

/// Signal that records of `kind` changed in the remote store during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUpdate {
    pub kind: ModelKind,
    /// When the batch was applied (Unix ms)
    pub timestamp: i64,
}

/// Latest update timestamp per model kind.
///
/// Kinds that were never updated are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUpdateLedger {
    entries: BTreeMap<ModelKind, i64>,
}

impl ModelUpdateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update, keeping the later timestamp if the kind is already present.
    pub fn record(&mut self, update: ModelUpdate) {
        self.entries
            .entry(update.kind)
            .and_modify(|timestamp| *timestamp = (*timestamp).max(update.timestamp))
            .or_insert(update.timestamp);
    }

    pub fn get(&self, kind: ModelKind) -> Option<i64> {
        self.entries.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ModelUpdate> + '_ {
        self.entries
            .iter()
            .map(|(kind, timestamp)| ModelUpdate {
                kind: *kind,
                timestamp: *timestamp,
            })
    }

    /// Fold another ledger into this one.
    pub fn merge(&mut self, other: &Self) {
        for update in other.iter() {
            self.record(update);
        }
    }
}
