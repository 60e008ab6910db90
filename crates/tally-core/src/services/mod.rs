//! Shared services used by app shells.

mod local_store;

pub use local_store::{LocalStore, ModifiedRecords};
