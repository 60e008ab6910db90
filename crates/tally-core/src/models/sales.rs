//! Receipts and their line items

use serde::{Deserialize, Serialize};

use super::{Model, ModelKind, RecordId};

/// A sale issued to a customer (or a walk-in)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub delivery_agent_id: Option<RecordId>,
    /// Sum of line totals after discount, minor currency units
    pub total_amount: i64,
    /// Amount collected at the counter, minor currency units
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl Receipt {
    /// Outstanding balance that turns into customer credit.
    pub const fn balance_due(&self) -> i64 {
        if self.is_cancelled {
            0
        } else {
            self.total_amount.saturating_sub(self.amount_paid)
        }
    }
}

impl Model for Receipt {
    const KIND: ModelKind = ModelKind::Receipts;
}

/// One product line on a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub receipt_id: RecordId,
    #[serde(default)]
    pub product_id: Option<RecordId>,
    pub description: String,
    pub quantity: i64,
    /// Unit price, minor currency units
    pub unit_price: i64,
}

impl ReceiptItem {
    pub const fn line_total(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price)
    }
}

impl Model for ReceiptItem {
    const KIND: ModelKind = ModelKind::ReceiptItems;
}
