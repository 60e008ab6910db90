//! Drives resolve credentials → open session → merge → mark completed, retrying
//! failed attempts on the scheduler until one succeeds.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, Notify};

use super::connector::{RemoteConnector, RemoteSessionError};
use super::credentials::CredentialResolver;
use super::ledger::ModelUpdate;
use super::merge::{MergeEngine, MergeError, MergeReport, Retention};
use super::remote::SyncSession;
use super::scheduler::{RetryPolicy, Scheduler};
use super::watermark::SettingsWatermarkStore;
use crate::config::SyncConfig;
use crate::services::LocalStore;
use crate::state::{SyncEvent, SyncPhase, SyncState, SyncStatus};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store unavailable: {0}")]
    StoreOpen(#[source] crate::Error),
    #[error(transparent)]
    RemoteSession(#[from] RemoteSessionError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl SyncError {
    /// Only an incompatible local schema stops the orchestrator; everything else is retried.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreOpen(error) if error.is_incompatible_schema())
    }
}

/// How a call to [`SyncOrchestrator::start`] ended.
#[derive(Debug)]
pub enum StartOutcome {
    Completed(MergeReport),
    /// Another run was active; this call did nothing
    AlreadyRunning,
    /// Local store unusable or retries exhausted; see [`SyncStatus::last_error`]
    Failed,
    /// Logout happened while the run was in flight
    Abandoned,
}

/// Where the orchestrator gets its local store from.
#[derive(Clone)]
pub enum LocalStoreSource {
    /// Opened on first use, so an unreadable store is reported through sync status
    Path(PathBuf),
    /// Already open
    Handle(LocalStore),
}

enum Interruption {
    Retry(String),
    Fatal(SyncError),
    Abandoned,
}

/// Marks the run owned by one logout epoch; `0` means no run.
///
/// A run left over from an earlier epoch is taken over, and its guard then
/// leaves the new owner's mark alone when it drops. Marks only grow.
struct RunGuard<'a> {
    owner: &'a AtomicU64,
    mark: u64,
}

impl<'a> RunGuard<'a> {
    const fn mark(epoch: u64) -> u64 {
        epoch.wrapping_add(1)
    }

    fn acquire(owner: &'a AtomicU64, epoch: u64) -> Option<Self> {
        let mark = Self::mark(epoch);
        let mut current = owner.load(Ordering::Acquire);
        loop {
            // Held by this epoch, or by a newer one than the caller saw
            if current >= mark {
                return None;
            }
            match owner.compare_exchange(current, mark, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(Self { owner, mark }),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .owner
            .compare_exchange(self.mark, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Owns the sync lifecycle for one app session.
///
/// All methods take `&self`; share the orchestrator by reference or `Arc`.
pub struct SyncOrchestrator<R, C, S> {
    source: LocalStoreSource,
    local: Mutex<Option<LocalStore>>,
    resolver: R,
    connector: C,
    scheduler: S,
    policy: RetryPolicy,
    batch_size: usize,
    retention: Retention,
    background_interval: Option<Duration>,
    status: watch::Sender<SyncStatus>,
    updates: broadcast::Sender<ModelUpdate>,
    session: Mutex<Option<SyncSession>>,
    running: AtomicU64,
    epoch: AtomicU64,
    logged_out: Notify,
}

impl<R, C, S> SyncOrchestrator<R, C, S>
where
    R: CredentialResolver,
    C: RemoteConnector,
    S: Scheduler,
{
    pub fn new(
        source: LocalStoreSource,
        resolver: R,
        connector: C,
        scheduler: S,
        config: &SyncConfig,
    ) -> Self {
        let local = match &source {
            LocalStoreSource::Handle(store) => Some(store.clone()),
            LocalStoreSource::Path(_) => None,
        };
        let (status, _) = watch::channel(SyncStatus::default());
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            source,
            local: Mutex::new(local),
            resolver,
            connector,
            scheduler,
            policy: config.retry_policy(),
            batch_size: config.batch_size,
            retention: config.retention,
            background_interval: config.background_interval(),
            status,
            updates,
            session: Mutex::new(None),
            running: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            logged_out: Notify::new(),
        }
    }

    /// Observe status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Observe per-kind update events as merge batches land remotely.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<ModelUpdate> {
        self.updates.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn sync_state(&self) -> SyncState {
        SyncState::from(&*self.status.borrow())
    }

    /// Sticky once a pass completes, until logout.
    pub fn is_sync_completed(&self) -> bool {
        self.status.borrow().completed
    }

    /// Whether a run of the current login is active; abandoned runs don't count.
    pub fn is_sync_in_progress(&self) -> bool {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.running.load(Ordering::Acquire) == RunGuard::mark(epoch)
    }

    /// Remote session of the last successful open, if any.
    pub async fn current_session(&self) -> Option<SyncSession> {
        self.session.lock().await.clone()
    }

    /// The local store, opening it on first use.
    pub async fn local_store(&self) -> crate::Result<LocalStore> {
        let mut slot = self.local.lock().await;
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }

        let store = match &self.source {
            LocalStoreSource::Handle(store) => store.clone(),
            LocalStoreSource::Path(path) => LocalStore::open(path.clone()).await?,
        };
        *slot = Some(store.clone());
        Ok(store)
    }

    /// Run until the first pass completes, retrying failed attempts.
    ///
    /// A second call while a run is active returns [`StartOutcome::AlreadyRunning`]
    /// without doing anything. A run still winding down from before a logout
    /// does not block a new one.
    pub async fn start(&self) -> StartOutcome {
        if self.status.borrow().phase == SyncPhase::Failed {
            return StartOutcome::Failed;
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        let Some(_guard) = RunGuard::acquire(&self.running, epoch) else {
            tracing::debug!("Sync already in progress, ignoring start");
            return StartOutcome::AlreadyRunning;
        };

        self.on(epoch, SyncEvent::Start);

        let mut failures: u32 = 0;
        loop {
            let reason = match self.attempt(epoch).await {
                Ok(report) => return StartOutcome::Completed(report),
                Err(Interruption::Abandoned) => return StartOutcome::Abandoned,
                Err(Interruption::Fatal(error)) => {
                    tracing::error!("Sync cannot continue: {}", error);
                    self.transition(epoch, None, |status| {
                        status.last_error = Some(error.to_string());
                    });
                    return StartOutcome::Failed;
                }
                Err(Interruption::Retry(reason)) => reason,
            };

            failures = failures.saturating_add(1);
            if !self.policy.allows_retry(failures) {
                tracing::warn!("Giving up on sync after {} failed attempts: {}", failures, reason);
                // Once a pass has completed, a failing pass only stalls sync
                let event = if self.status.borrow().completed {
                    SyncEvent::PassGivenUp
                } else {
                    SyncEvent::RetriesExhausted
                };
                self.transition(epoch, Some(event), |status| {
                    status.consecutive_failures = failures;
                    status.stalled |= status.completed;
                    status.last_error = Some(reason);
                    status.next_retry_at = None;
                });
                return StartOutcome::Failed;
            }

            let delay = self.policy.delay_for(failures);
            let retry_at = self
                .scheduler
                .now_millis()
                .saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
            let stalled = self.policy.is_stalled(failures);
            tracing::warn!(
                "Sync attempt {} failed ({}), retrying in {:?}",
                failures,
                reason,
                delay
            );
            self.transition(epoch, None, |status| {
                status.consecutive_failures = failures;
                status.stalled = stalled;
                status.last_error = Some(reason);
                status.next_retry_at = Some(retry_at);
            });

            if !self.sleep_unless_logout(epoch, delay).await {
                return StartOutcome::Abandoned;
            }
            self.transition(epoch, Some(SyncEvent::RetryElapsed), |status| {
                status.next_retry_at = None;
            });
        }
    }

    /// [`Self::start`], then keep running background passes at the configured
    /// interval until logout or a terminal failure.
    ///
    /// A background pass that gives up only stalls sync; the next interval tries again.
    pub async fn run(&self) -> StartOutcome {
        let epoch = self.epoch.load(Ordering::Acquire);
        let first = self.start().await;
        let completed = matches!(first, StartOutcome::Completed(_));
        let Some(interval) = self.background_interval.filter(|_| completed) else {
            return first;
        };

        loop {
            if !self.sleep_unless_logout(epoch, interval).await {
                return StartOutcome::Abandoned;
            }
            tracing::debug!("Starting background sync pass");
            match self.start().await {
                StartOutcome::Completed(_) | StartOutcome::AlreadyRunning => {}
                StartOutcome::Failed if self.status.borrow().phase != SyncPhase::Failed => {}
                outcome => return outcome,
            }
        }
    }

    /// Discard the session and reset sync status; an in-flight run stops at its
    /// next step without writing the watermark.
    pub async fn logout(&self) {
        self.status.send_modify(|status| {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            *status = SyncStatus::default();
        });
        self.logged_out.notify_waiters();
        self.session.lock().await.take();
        tracing::info!("Sync session discarded on logout");
    }

    async fn attempt(&self, epoch: u64) -> Result<MergeReport, Interruption> {
        let local = match self.local_store().await {
            Ok(local) => local,
            Err(error) => {
                let error = SyncError::StoreOpen(error);
                if error.is_fatal() {
                    self.on(epoch, SyncEvent::StoreIncompatible);
                    return Err(Interruption::Fatal(error));
                }
                self.on(epoch, SyncEvent::StoreUnavailable);
                return Err(Interruption::Retry(error.to_string()));
            }
        };

        let Some(credentials) = self.resolver.resolve().await else {
            tracing::debug!("No sync credentials available yet");
            self.on(epoch, SyncEvent::CredentialsAbsent);
            return Err(Interruption::Retry("no credentials available".to_string()));
        };
        self.checkpoint(epoch)?;
        self.on(epoch, SyncEvent::CredentialsResolved);

        let session = match self.connector.connect(&credentials).await {
            Ok(session) => session,
            Err(error) => {
                self.on(epoch, SyncEvent::SessionFailed);
                return Err(Interruption::Retry(SyncError::from(error).to_string()));
            }
        };
        {
            let mut slot = self.session.lock().await;
            self.checkpoint(epoch)?;
            *slot = Some(session.clone());
        }
        self.on(epoch, SyncEvent::SessionOpened);

        let engine = MergeEngine::new(
            local.clone(),
            SettingsWatermarkStore::new(local),
            self.batch_size,
        )
        .with_retention(self.retention)
        .with_updates(self.updates.clone());

        let merged = match engine.run(&session, self.scheduler.now_millis()).await {
            Ok(report) => {
                self.checkpoint(epoch)?;
                engine.commit(&report).await.map(|watermark| (report, watermark))
            }
            Err(error) => Err(error),
        };
        let (report, watermark) = match merged {
            Ok(merged) => merged,
            Err(error) => {
                let mut slot = self.session.lock().await;
                if !self.is_abandoned(epoch) {
                    slot.take();
                }
                drop(slot);
                self.on(epoch, SyncEvent::MergeFailed);
                return Err(Interruption::Retry(SyncError::from(error).to_string()));
            }
        };

        if let Err(error) = engine.release_merged(&report).await {
            tracing::warn!("Keeping merged local records: {}", error);
        }

        let completed_at = self.scheduler.now_millis();
        self.transition(epoch, Some(SyncEvent::MergeSucceeded), |status| {
            status.completed = true;
            status.consecutive_failures = 0;
            status.stalled = false;
            status.last_error = None;
            status.next_retry_at = None;
            status.last_completed_at = Some(completed_at);
            status.ledger.merge(&report.ledger);
        });
        tracing::info!(
            "Sync completed for {}: {} records merged, {} stale, watermark {}",
            session.partition_key(),
            report.total_applied(),
            report.total_stale(),
            watermark
        );
        Ok(report)
    }

    /// Wait out `delay`, cut short by logout; `false` when the run was abandoned.
    async fn sleep_unless_logout(&self, epoch: u64, delay: Duration) -> bool {
        let logged_out = self.logged_out.notified();
        tokio::pin!(logged_out);
        // Registered before the epoch check so a logout in between still wakes us
        logged_out.as_mut().enable();
        if self.is_abandoned(epoch) {
            return false;
        }

        tokio::select! {
            () = self.scheduler.sleep(delay) => {}
            () = logged_out => {}
        }
        !self.is_abandoned(epoch)
    }

    fn is_abandoned(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) != epoch
    }

    fn checkpoint(&self, epoch: u64) -> Result<(), Interruption> {
        if self.is_abandoned(epoch) {
            tracing::debug!("Sync run abandoned after logout");
            Err(Interruption::Abandoned)
        } else {
            Ok(())
        }
    }

    fn on(&self, epoch: u64, event: SyncEvent) {
        self.transition(epoch, Some(event), |_| {});
    }

    /// Apply `event` and `update` to the published status, unless the run was abandoned.
    fn transition(&self, epoch: u64, event: Option<SyncEvent>, update: impl FnOnce(&mut SyncStatus)) {
        self.status.send_if_modified(|status| {
            if self.is_abandoned(epoch) {
                return false;
            }
            if let Some(event) = event {
                let next = status.phase.on(event);
                if next != status.phase {
                    tracing::debug!("Sync phase {} -> {}", status.phase, next);
                    status.phase = next;
                }
            }
            update(status);
            true
        });
    }
}
