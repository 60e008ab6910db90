//! tally-core - Sync core for Tally
//!
//! This crate contains the record models, the device-local store, and the
//! machinery that merges local changes into the signed-in user's remote
//! partition. App shells (mobile, desktop) link against it.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
mod util;

pub use error::{Error, Result};
pub use models::{ModelKind, Record, RecordId};
