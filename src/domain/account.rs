//! Account model
//!
//! An account is the unit a balance lives on. Balances only change through
//! the ledger engine; accounts are deactivated, never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, Balance, DomainError};

/// Account product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Saving,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Saving => "saving",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(AccountType::Checking),
            "saving" => Ok(AccountType::Saving),
            other => Err(DomainError::InvalidAccountType(other.to_string())),
        }
    }
}

/// Account status (soft delete)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Deactivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Deactivated => "deactivated",
        }
    }
}

impl Default for AccountStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "deactivated" => Ok(AccountStatus::Deactivated),
            other => Err(format!("Invalid account status: {}", other)),
        }
    }
}

/// A persisted account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    /// Externally displayable number, distinct from `id`
    pub account_number: String,
    pub account_type: AccountType,
    pub balance: Balance,
    /// Balance the account was opened with; never changes
    pub opening_balance: Balance,
    pub currency: String,
    pub status: AccountStatus,
    pub owner_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.is_active() && self.owner_user_id == user_id
    }

    /// Fail with `AccountNotFound` unless the account can take part in
    /// balance operations.
    pub fn ensure_active(&self) -> Result<(), DomainError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::account_not_found(self.id))
        }
    }

    /// Balance after crediting `amount`
    pub fn credited(&self, amount: &Amount) -> Result<Balance, DomainError> {
        Ok(self.balance.credit(amount)?)
    }

    /// Balance after debiting `amount`; refuses to go below zero
    pub fn debited(&self, amount: &Amount) -> Result<Balance, DomainError> {
        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_balance(
                amount.value(),
                self.balance.value(),
            ));
        }
        Ok(self.balance.debit(amount)?)
    }
}

/// Request to open an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Identifier to use; a fresh one is assigned when absent
    pub id: Option<Uuid>,
    pub owner_user_id: Uuid,
    pub account_type: AccountType,
    pub initial_balance: Decimal,
    /// ISO currency code; the configured default when absent
    pub currency: Option<String>,
}

impl NewAccount {
    pub fn new(owner_user_id: Uuid, account_type: AccountType) -> Self {
        Self {
            id: None,
            owner_user_id,
            account_type,
            initial_balance: Decimal::ZERO,
            currency: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_initial_balance(mut self, initial_balance: Decimal) -> Self {
        self.initial_balance = initial_balance;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}

/// Normalize an ISO-4217 alpha code: three ASCII letters, upper-cased.
pub fn normalize_currency(code: &str) -> Result<String, DomainError> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::InvalidParameter(format!(
            "currency must be a three-letter ISO code, got '{}'",
            code
        )));
    }
    Ok(code.to_ascii_uppercase())
}
