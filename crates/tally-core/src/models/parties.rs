//! People the shop deals with: customers, suppliers and delivery agents

use serde::{Deserialize, Serialize};

use super::{Model, ModelKind};

/// A customer who buys from the shop, possibly on credit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Customer {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Model for Customer {
    const KIND: ModelKind = ModelKind::Customers;
}

/// A supplier the shop restocks from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub name: String,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Model for Supplier {
    const KIND: ModelKind = ModelKind::Suppliers;
}

/// Someone who delivers orders on the shop's behalf
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAgent {
    pub name: String,
    #[serde(default)]
    pub mobile: Option<String>,
    /// Flat fee per delivery, minor currency units
    #[serde(default)]
    pub fee_per_delivery: i64,
}

impl Model for DeliveryAgent {
    const KIND: ModelKind = ModelKind::DeliveryAgents;
}
