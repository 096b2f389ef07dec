//! Command definitions
//!
//! Commands represent requests to move money. Amounts arrive as raw
//! decimals and are validated by the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =========================================================================
// DepositCommand
// =========================================================================

/// Credit an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositCommand {
    pub account_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    /// Caller-supplied idempotency key (32 lowercase hex chars)
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl DepositCommand {
    pub fn new(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            amount,
            description: String::new(),
            transaction_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

// =========================================================================
// WithdrawCommand
// =========================================================================

/// Debit an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawCommand {
    pub account_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl WithdrawCommand {
    pub fn new(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            amount,
            description: String::new(),
            transaction_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

// =========================================================================
// TransferCommand
// =========================================================================

/// Move money between two accounts of the same currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl TransferCommand {
    pub fn new(from_account_id: Uuid, to_account_id: Uuid, amount: Decimal) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            description: String::new(),
            transaction_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}
