//! Last-sync watermark persisted in the device-local settings table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::services::LocalStore;
use crate::{Error, Result};

const WATERMARK_KEY: &str = "sync.last_merged_at";

/// Everything updated at or before this instant (Unix ms) has been merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(i64);

impl Watermark {
    /// Beginning of time: merge everything.
    pub const EPOCH: Self = Self(0);

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The later of the two; a watermark never moves backwards.
    #[must_use]
    pub fn advance(self, candidate: Self) -> Self {
        self.max(candidate)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Durable single-value store for the device watermark.
#[allow(async_fn_in_trait)]
pub trait WatermarkStore {
    /// The persisted watermark, `None` on a fresh install.
    async fn read(&self) -> Result<Option<Watermark>>;

    /// Persist `watermark` unless the stored one is already later.
    ///
    /// Returns the value actually stored.
    async fn write(&self, watermark: Watermark) -> Result<Watermark>;

    /// Read the watermark, initialising it to [`Watermark::EPOCH`] when absent.
    async fn read_or_init(&self) -> Result<Watermark> {
        match self.read().await? {
            Some(watermark) => Ok(watermark),
            None => self.write(Watermark::EPOCH).await,
        }
    }
}

/// [`WatermarkStore`] backed by the local store's key-value settings.
#[derive(Clone)]
pub struct SettingsWatermarkStore {
    store: LocalStore,
}

impl SettingsWatermarkStore {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

impl WatermarkStore for SettingsWatermarkStore {
    async fn read(&self) -> Result<Option<Watermark>> {
        let Some(raw) = self.store.get_setting(WATERMARK_KEY).await? else {
            return Ok(None);
        };
        raw.trim()
            .parse::<i64>()
            .map(|millis| Some(Watermark(millis)))
            .map_err(|_| Error::Database(format!("Invalid stored watermark: {raw}")))
    }

    async fn write(&self, watermark: Watermark) -> Result<Watermark> {
        let next = self
            .read()
            .await?
            .map_or(watermark, |current| current.advance(watermark));
        self.store
            .set_setting(WATERMARK_KEY, &next.as_millis().to_string())
            .await?;
        tracing::debug!("Persisted sync watermark {next}");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SettingsWatermarkStore {
        SettingsWatermarkStore::new(LocalStore::open_in_memory().await.unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_install_has_no_watermark() {
        let store = setup().await;
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_or_init_persists_epoch() {
        let store = setup().await;
        assert_eq!(store.read_or_init().await.unwrap(), Watermark::EPOCH);
        assert_eq!(store.read().await.unwrap(), Some(Watermark::EPOCH));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_never_moves_backwards() {
        let store = setup().await;
        store.write(Watermark::from_millis(5_000)).await.unwrap();

        let stored = store.write(Watermark::from_millis(1_000)).await.unwrap();
        assert_eq!(stored, Watermark::from_millis(5_000));
        assert_eq!(
            store.read().await.unwrap(),
            Some(Watermark::from_millis(5_000))
        );

        store.write(Watermark::from_millis(9_000)).await.unwrap();
        assert_eq!(
            store.read().await.unwrap(),
            Some(Watermark::from_millis(9_000))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn garbage_watermark_is_an_error() {
        let local = LocalStore::open_in_memory().await.unwrap();
        local.set_setting(WATERMARK_KEY, "yesterday").await.unwrap();

        let store = SettingsWatermarkStore::new(local);
        assert!(store.read().await.is_err());
    }
}
