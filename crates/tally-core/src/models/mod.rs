//! Data models for Tally

mod catalog;
mod finance;
mod parties;
mod record;
mod sales;
mod sync_conflict;

pub use catalog::{Product, StockMovement, StockReason};
pub use finance::{Credit, Expense, Payment, PaymentMethod};
pub use parties::{Customer, DeliveryAgent, Supplier};
pub use record::{Model, ModelKind, Origin, Record, RecordId};
pub use sales::{Receipt, ReceiptItem};
pub use sync_conflict::SyncConflict;
