//! Database layer for Tally

mod connection;
pub(crate) mod migrations;
mod repository;
mod settings_repository;

pub use connection::{Database, ReplicaConfig};
pub(crate) use repository::parse_record;
pub use repository::{LibSqlRecordRepository, PageCursor, RecordRepository};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
