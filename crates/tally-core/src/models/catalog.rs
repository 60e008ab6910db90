//! Inventory: products and the stock movements that change their quantity

use serde::{Deserialize, Serialize};

use super::{Model, ModelKind, RecordId};

/// A product on sale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    /// Selling price, minor currency units
    pub price: i64,
    /// Purchase cost, minor currency units
    #[serde(default)]
    pub cost_price: Option<i64>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub supplier_id: Option<RecordId>,
}

impl Model for Product {
    const KIND: ModelKind = ModelKind::Products;
}

/// Why stock changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    Restock,
    Sale,
    Return,
    Adjustment,
}

/// A signed change to a product's quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: RecordId,
    /// Positive for stock in, negative for stock out
    pub delta: i64,
    pub reason: StockReason,
    #[serde(default)]
    pub note: Option<String>,
}

impl Model for StockMovement {
    const KIND: ModelKind = ModelKind::StockMovements;
}
