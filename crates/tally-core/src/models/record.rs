//! Record envelope shared by every synced model

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Every record type that takes part in sync.
///
/// The order of [`ModelKind::ALL`] is the order a merge pass visits them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Customers,
    Suppliers,
    DeliveryAgents,
    Products,
    StockMovements,
    Receipts,
    ReceiptItems,
    Payments,
    Credits,
    Expenses,
}

impl ModelKind {
    /// All kinds, in merge order.
    pub const ALL: [Self; 10] = [
        Self::Customers,
        Self::Suppliers,
        Self::DeliveryAgents,
        Self::Products,
        Self::StockMovements,
        Self::Receipts,
        Self::ReceiptItems,
        Self::Payments,
        Self::Credits,
        Self::Expenses,
    ];

    /// Stable name used in logs, ledger events and conflict rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Suppliers => "suppliers",
            Self::DeliveryAgents => "delivery_agents",
            Self::Products => "products",
            Self::StockMovements => "stock_movements",
            Self::Receipts => "receipts",
            Self::ReceiptItems => "receipt_items",
            Self::Payments => "payments",
            Self::Credits => "credits",
            Self::Expenses => "expenses",
        }
    }

    /// Table backing this kind in both the local and the remote store.
    pub const fn table(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown model kind: {s}"))
    }
}

/// Capability shared by every record payload stored and synced by Tally.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Which table and ledger entry this payload belongs to.
    const KIND: ModelKind;
}

/// Which store currently owns a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written on this device and not yet merged
    Local,
    /// Read back from the partitioned remote store
    Synced,
}

/// A stored record of some model type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Unique identifier, also the upsert key remotely
    pub id: RecordId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag for sync
    pub is_deleted: bool,
    /// Ownership tag
    pub origin: Origin,
    /// Model-specific fields
    pub data: T,
}

impl<T: Model> Record<T> {
    /// Create a new local record stamped with the current time
    #[must_use]
    pub fn new(data: T) -> Self {
        Self::at(data, chrono::Utc::now().timestamp_millis())
    }

    /// Create a new local record stamped with `now` (Unix ms)
    #[must_use]
    pub fn at(data: T, now: i64) -> Self {
        Self {
            id: RecordId::new(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            origin: Origin::Local,
            data,
        }
    }

    /// Model kind of this record
    pub const fn kind(&self) -> ModelKind {
        T::KIND
    }
}
