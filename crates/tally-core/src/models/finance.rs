//! Money movements outside of receipts: payments, credits, expenses

use serde::{Deserialize, Serialize};

use super::{Model, ModelKind, RecordId};

/// How money changed hands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Transfer,
    Mobile,
}

/// A payment received from a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(default)]
    pub customer_id: Option<RecordId>,
    #[serde(default)]
    pub receipt_id: Option<RecordId>,
    pub amount: i64,
    #[serde(default)]
    pub method: PaymentMethod,
}

impl Model for Payment {
    const KIND: ModelKind = ModelKind::Payments;
}

/// Credit extended to a customer and the part of it already repaid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub customer_id: RecordId,
    #[serde(default)]
    pub receipt_id: Option<RecordId>,
    pub amount: i64,
    #[serde(default)]
    pub amount_repaid: i64,
    /// Optional due date (Unix ms)
    #[serde(default)]
    pub due_at: Option<i64>,
}

impl Credit {
    pub const fn outstanding(&self) -> i64 {
        let remaining = self.amount.saturating_sub(self.amount_repaid);
        if remaining < 0 {
            0
        } else {
            remaining
        }
    }
}

impl Model for Credit {
    const KIND: ModelKind = ModelKind::Credits;
}

/// Money the shop spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub description: String,
    pub amount: i64,
    #[serde(default)]
    pub category: Option<String>,
}

impl Model for Expense {
    const KIND: ModelKind = ModelKind::Expenses;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overpaid_credit_is_not_negative() {
        let credit = Credit {
            customer_id: RecordId::new(),
            receipt_id: None,
            amount: 1_000,
            amount_repaid: 1_200,
            due_at: None,
        };
        assert_eq!(credit.outstanding(), 0);
    }

    #[test]
    fn payment_method_defaults_to_cash() {
        let payment: Payment = serde_json::from_str(r#"{"amount": 500}"#).unwrap();
        assert_eq!(payment.method, PaymentMethod::Cash);
        assert_eq!(payment.customer_id, None);
    }
}
