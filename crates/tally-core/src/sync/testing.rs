//! In-crate fakes for driving the orchestrator without a network or real time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use super::connector::{RemoteConnector, RemoteSessionError};
use super::credentials::{CredentialResolver, Credentials};
use super::remote::{RemoteStore, SyncSession};
use super::scheduler::Scheduler;
use crate::auth::AuthUser;
use crate::Error;

pub fn credentials(user_id: &str) -> Credentials {
    Credentials {
        access_token: "access-token".to_string(),
        user: AuthUser {
            id: user_id.to_string(),
            email: None,
        },
    }
}

/// Simulated clock; `sleep` records the delay and advances time instantly.
#[derive(Clone)]
pub struct ManualScheduler {
    state: Arc<Mutex<(i64, Vec<Duration>)>>,
}

impl ManualScheduler {
    pub fn starting_at(now: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new((now, Vec::new()))),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.state.lock().unwrap().0 += millis;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().1.clone()
    }
}

impl Scheduler for ManualScheduler {
    fn now_millis(&self) -> i64 {
        self.state.lock().unwrap().0
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock().unwrap();
            state.0 += i64::try_from(duration.as_millis()).unwrap();
            state.1.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Absent for the first `absent_for` calls, then the given credentials.
#[derive(Clone)]
pub struct ScriptedResolver {
    credentials: Credentials,
    absent_for: u32,
    calls: Arc<AtomicU32>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedResolver {
    pub fn new(credentials: Credentials, absent_for: u32) -> Self {
        Self {
            credentials,
            absent_for,
            calls: Arc::new(AtomicU32::new(0)),
            gate: None,
        }
    }

    /// Signal `entered` on each call, then wait for `release` before answering.
    #[must_use]
    pub fn gated(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((entered, release));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CredentialResolver for ScriptedResolver {
    async fn resolve(&self) -> Option<Credentials> {
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (call >= self.absent_for).then(|| self.credentials.clone())
    }
}

/// Connects to a shared in-memory remote store, failing the first `fail_times` calls.
#[derive(Clone)]
pub struct InMemoryConnector {
    store: RemoteStore,
    failures_left: Arc<AtomicU32>,
    connects: Arc<AtomicU32>,
}

impl InMemoryConnector {
    pub fn new(store: RemoteStore) -> Self {
        Self {
            store,
            failures_left: Arc::new(AtomicU32::new(0)),
            connects: Arc::new(AtomicU32::new(0)),
        }
    }

    #[must_use]
    pub fn failing(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl RemoteConnector for InMemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<SyncSession, RemoteSessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RemoteSessionError::Store(Error::Database(
                "simulated outage".to_string(),
            )));
        }
        Ok(SyncSession::new(credentials.user.clone(), self.store.clone())?)
    }
}
