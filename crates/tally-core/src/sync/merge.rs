//! Pushes local changes made since the last watermark into the remote session.
//!
//! A pass visits every [`ModelKind`] exactly once, in [`ModelKind::ALL`] order.
//! Any failure aborts the whole pass; the watermark is only written by
//! [`MergeEngine::commit`] after a pass succeeded, so a retry starts over from
//! the same watermark and re-applies everything (upserts are idempotent).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use super::ledger::{ModelUpdate, ModelUpdateLedger};
use super::remote::{SyncSession, UpsertOutcome};
use super::watermark::{Watermark, WatermarkStore};
use crate::models::{
    Credit, Customer, DeliveryAgent, Expense, Model, ModelKind, Payment, Product, Receipt,
    ReceiptItem, Record, RecordId, StockMovement, Supplier,
};
use crate::services::LocalStore;

/// What happens to local rows once a pass covering them has been committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Delete them; the remote session is the source of truth from then on
    #[default]
    Purge,
    /// Leave them in place as a disposable cache
    Keep,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Failed to read pending {kind} records: {source}")]
    Query {
        kind: ModelKind,
        #[source]
        source: crate::Error,
    },
    #[error("Failed to upsert {kind} {id}: {source}")]
    Upsert {
        kind: ModelKind,
        id: RecordId,
        #[source]
        source: crate::Error,
    },
    #[error("Failed to flush remote store: {0}")]
    Flush(#[source] crate::Error),
    #[error("Watermark store failed: {0}")]
    Watermark(#[source] crate::Error),
    #[error("Failed to release merged {kind} records: {source}")]
    Release {
        kind: ModelKind,
        #[source]
        source: crate::Error,
    },
}

impl MergeError {
    /// Model kind whose batch failed, if the failure is tied to one.
    pub const fn kind(&self) -> Option<ModelKind> {
        match self {
            Self::Query { kind, .. } | Self::Upsert { kind, .. } | Self::Release { kind, .. } => {
                Some(*kind)
            }
            Self::Flush(_) | Self::Watermark(_) => None,
        }
    }
}

/// One local record version a pass handed to the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRecord {
    pub id: RecordId,
    pub updated_at: i64,
}

impl MergedRecord {
    pub const fn of<T: Model>(record: &Record<T>) -> Self {
        Self {
            id: record.id,
            updated_at: record.updated_at,
        }
    }
}

/// Outcome of merging one model kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    pub kind: ModelKind,
    /// Records now reflected remotely
    pub applied: usize,
    /// Records the remote already held a newer version of
    pub stale: usize,
    /// Every version upserted, applied or stale
    pub merged: Vec<MergedRecord>,
}

impl KindReport {
    const fn empty(kind: ModelKind) -> Self {
        Self {
            kind,
            applied: 0,
            stale: 0,
            merged: Vec::new(),
        }
    }

    pub const fn total(&self) -> usize {
        self.applied + self.stale
    }
}

/// Summary of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Watermark the pass started from
    pub since: Watermark,
    /// Everything updated at or before this instant is now merged
    pub cutoff: Watermark,
    /// One entry per kind, in visiting order
    pub kinds: Vec<KindReport>,
    pub ledger: ModelUpdateLedger,
}

impl MergeReport {
    pub fn kind(&self, kind: ModelKind) -> Option<&KindReport> {
        self.kinds.iter().find(|report| report.kind == kind)
    }

    pub fn total_applied(&self) -> usize {
        self.kinds.iter().map(|report| report.applied).sum()
    }

    pub fn total_stale(&self) -> usize {
        self.kinds.iter().map(|report| report.stale).sum()
    }
}

/// Copies local changes into a remote session.
pub struct MergeEngine<W: WatermarkStore> {
    local: LocalStore,
    watermarks: W,
    batch_size: usize,
    retention: Retention,
    updates: Option<broadcast::Sender<ModelUpdate>>,
}

impl<W: WatermarkStore> MergeEngine<W> {
    pub fn new(local: LocalStore, watermarks: W, batch_size: usize) -> Self {
        Self {
            local,
            watermarks,
            batch_size: batch_size.max(1),
            retention: Retention::default(),
            updates: None,
        }
    }

    #[must_use]
    pub const fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Also broadcast every ledger entry as it is recorded.
    #[must_use]
    pub fn with_updates(mut self, updates: broadcast::Sender<ModelUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Run one merge pass at wall-clock time `now` (Unix ms).
    ///
    /// Does not touch the watermark beyond initialising it on first use.
    pub async fn run(&self, session: &SyncSession, now: i64) -> Result<MergeReport, MergeError> {
        let since = self
            .watermarks
            .read_or_init()
            .await
            .map_err(MergeError::Watermark)?;
        // Anything stamped at `now` may still be in flight; leave it to the next pass.
        let cutoff = since.advance(Watermark::from_millis(now.saturating_sub(1)));

        tracing::debug!(
            "Merging local changes after {} into {}",
            since,
            session.partition_key()
        );

        let mut kinds = Vec::with_capacity(ModelKind::ALL.len());
        let mut ledger = ModelUpdateLedger::new();
        for kind in ModelKind::ALL {
            let report = self.merge_kind(kind, session, since).await?;
            if report.total() > 0 {
                let update = ModelUpdate {
                    kind,
                    timestamp: now,
                };
                ledger.record(update);
                if let Some(updates) = &self.updates {
                    // No subscribers is fine
                    let _ = updates.send(update);
                }
                tracing::debug!(
                    "Merged {} {} ({} stale)",
                    report.applied,
                    kind,
                    report.stale
                );
            }
            kinds.push(report);
        }

        session.store().flush().await.map_err(MergeError::Flush)?;

        Ok(MergeReport {
            since,
            cutoff,
            kinds,
            ledger,
        })
    }

    /// Persist the watermark reached by `report`; returns the stored value.
    pub async fn commit(&self, report: &MergeReport) -> Result<Watermark, MergeError> {
        self.watermarks
            .write(report.cutoff)
            .await
            .map_err(MergeError::Watermark)
    }

    /// Apply the retention policy to the record versions a committed `report` pushed.
    ///
    /// Returns the number of local rows removed.
    pub async fn release_merged(&self, report: &MergeReport) -> Result<u64, MergeError> {
        if self.retention == Retention::Keep {
            return Ok(0);
        }

        let mut purged = 0;
        for report in report.kinds.iter().filter(|report| !report.merged.is_empty()) {
            let kind = report.kind;
            purged += self
                .local
                .purge_merged(kind, &report.merged)
                .await
                .map_err(|source| MergeError::Release { kind, source })?;
        }
        if purged > 0 {
            tracing::debug!("Released {} merged local records", purged);
        }
        Ok(purged)
    }

    async fn merge_kind(
        &self,
        kind: ModelKind,
        session: &SyncSession,
        since: Watermark,
    ) -> Result<KindReport, MergeError> {
        match kind {
            ModelKind::Customers => self.merge_model::<Customer>(session, since).await,
            ModelKind::Suppliers => self.merge_model::<Supplier>(session, since).await,
            ModelKind::DeliveryAgents => self.merge_model::<DeliveryAgent>(session, since).await,
            ModelKind::Products => self.merge_model::<Product>(session, since).await,
            ModelKind::StockMovements => self.merge_model::<StockMovement>(session, since).await,
            ModelKind::Receipts => self.merge_model::<Receipt>(session, since).await,
            ModelKind::ReceiptItems => self.merge_model::<ReceiptItem>(session, since).await,
            ModelKind::Payments => self.merge_model::<Payment>(session, since).await,
            ModelKind::Credits => self.merge_model::<Credit>(session, since).await,
            ModelKind::Expenses => self.merge_model::<Expense>(session, since).await,
        }
    }

    async fn merge_model<T: Model>(
        &self,
        session: &SyncSession,
        since: Watermark,
    ) -> Result<KindReport, MergeError> {
        let kind = T::KIND;
        let mut report = KindReport::empty(kind);
        let mut pending = self.local.modified_since::<T>(since, self.batch_size);

        while let Some(batch) = pending
            .next_batch()
            .await
            .map_err(|source| MergeError::Query { kind, source })?
        {
            for record in &batch {
                let outcome = session
                    .upsert(record)
                    .await
                    .map_err(|source| MergeError::Upsert {
                        kind,
                        id: record.id,
                        source,
                    })?;
                match outcome {
                    UpsertOutcome::Applied => report.applied += 1,
                    UpsertOutcome::Stale { .. } => report.stale += 1,
                }
                report.merged.push(MergedRecord::of(record));
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::sync::remote::RemoteStore;
    use crate::sync::watermark::SettingsWatermarkStore;
    use pretty_assertions::assert_eq;

    async fn fixture() -> (LocalStore, SyncSession) {
        let local = LocalStore::open_in_memory().await.unwrap();
        let remote = RemoteStore::open_in_memory().await.unwrap();
        let session = SyncSession::new(
            AuthUser {
                id: "merchant".to_string(),
                email: None,
            },
            remote,
        )
        .unwrap();
        (local, session)
    }

    fn engine(local: &LocalStore, batch_size: usize) -> MergeEngine<SettingsWatermarkStore> {
        MergeEngine::new(
            local.clone(),
            SettingsWatermarkStore::new(local.clone()),
            batch_size,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_visits_every_kind_once_in_order() {
        let (local, session) = fixture().await;
        let report = engine(&local, 10).run(&session, 1_000).await.unwrap();

        let visited: Vec<_> = report.kinds.iter().map(|report| report.kind).collect();
        assert_eq!(visited, ModelKind::ALL.to_vec());
        assert!(report.ledger.is_empty());
        assert_eq!(report.since, Watermark::EPOCH);
        assert_eq!(report.cutoff, Watermark::from_millis(999));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_pages_through_small_batches_and_broadcasts() {
        let (local, session) = fixture().await;
        for n in 0..5 {
            local
                .write(&Record::at(Customer::new(format!("Customer {n}")), 100 + n))
                .await
                .unwrap();
        }

        let (tx, mut rx) = broadcast::channel(16);
        let engine = engine(&local, 2).with_updates(tx);
        let report = engine.run(&session, 1_000).await.unwrap();

        assert_eq!(report.kind(ModelKind::Customers).unwrap().applied, 5);
        assert_eq!(report.total_applied(), 5);
        assert_eq!(session.count(ModelKind::Customers).await.unwrap(), 5);
        assert_eq!(report.ledger.get(ModelKind::Customers), Some(1_000));
        assert_eq!(
            rx.try_recv().unwrap(),
            ModelUpdate {
                kind: ModelKind::Customers,
                timestamp: 1_000
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_does_not_write_the_watermark() {
        let (local, session) = fixture().await;
        let watermarks = SettingsWatermarkStore::new(local.clone());
        let engine = engine(&local, 10);

        engine.run(&session, 5_000).await.unwrap();
        assert_eq!(watermarks.read().await.unwrap(), Some(Watermark::EPOCH));

        let report = engine.run(&session, 6_000).await.unwrap();
        let stored = engine.commit(&report).await.unwrap();
        assert_eq!(stored, Watermark::from_millis(5_999));
        assert_eq!(watermarks.read().await.unwrap(), Some(stored));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_records_are_counted_not_failed() {
        let (local, session) = fixture().await;
        let mut record = Record::at(Customer::new("Remote wins"), 500);
        session.upsert(&Record {
            updated_at: 900,
            ..record.clone()
        })
        .await
        .unwrap();
        record.data.name = "Local edit".to_string();
        local.write(&record).await.unwrap();

        let report = engine(&local, 10).run(&session, 1_000).await.unwrap();
        let customers = report.kind(ModelKind::Customers).unwrap();
        assert_eq!((customers.applied, customers.stale), (0, 1));
        assert_eq!(report.total_stale(), 1);
        assert_eq!(session.list_conflicts(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn release_honours_retention() {
        let (local, session) = fixture().await;
        let merged = Record::at(Customer::new("Merged"), 100);
        let later = Record::at(Customer::new("Written after cutoff"), 2_000);
        local.write(&merged).await.unwrap();

        let keep = engine(&local, 10).with_retention(Retention::Keep);
        let report = keep.run(&session, 1_000).await.unwrap();
        keep.commit(&report).await.unwrap();
        local.write(&later).await.unwrap();
        assert_eq!(keep.release_merged(&report).await.unwrap(), 0);

        let purge = engine(&local, 10);
        assert_eq!(purge.release_merged(&report).await.unwrap(), 1);
        assert!(local.get::<Customer>(&merged.id).await.unwrap().is_none());
        assert!(local.get::<Customer>(&later.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn release_leaves_records_the_pass_never_pushed() {
        let (local, session) = fixture().await;
        let engine = engine(&local, 10);
        let merged = Record::at(Customer::new("Merged"), 100);
        local.write(&merged).await.unwrap();

        let report = engine.run(&session, 1_000).await.unwrap();
        // Lands below the cutoff after the customers cursor finished
        let late = Record::at(Customer::new("Back-dated"), 995);
        local.write(&late).await.unwrap();
        engine.commit(&report).await.unwrap();

        assert_eq!(engine.release_merged(&report).await.unwrap(), 1);
        assert!(local.get::<Customer>(&merged.id).await.unwrap().is_none());
        assert!(local.get::<Customer>(&late.id).await.unwrap().is_some());
        assert!(session.get::<Customer>(&late.id).await.unwrap().is_none());
    }
}
