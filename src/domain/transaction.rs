//! Transaction record
//!
//! One record per ledger operation, attributed to its source account.
//! Records are written `pending` and advanced to `completed` inside the same
//! unit of work; a terminal record never changes again.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, Balance, DomainError};

/// Ledger operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
        }
    }

    /// Deposits credit the source account, everything else debits it.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionType::Deposit)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(format!("Invalid transaction type: {}", other)),
        }
    }
}

/// Record lifecycle
///
/// `pending` is the only non-terminal state. `failed` is never stored since a
/// failing unit rolls back, and no operation currently produces `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(self, TransactionStatus::Pending) && next.is_terminal()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("Invalid transaction status: {}", other)),
        }
    }
}

/// A ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// 32 hex chars; globally unique idempotency and audit key
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub description: String,
    /// Source account; balances below are measured against it
    pub account_id: Uuid,
    /// Destination, transfers only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<Uuid>,
    pub balance_before: Balance,
    pub balance_after: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a new pending record.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        transaction_id: String,
        transaction_type: TransactionType,
        amount: Amount,
        currency: impl Into<String>,
        description: impl Into<String>,
        account_id: Uuid,
        to_account_id: Option<Uuid>,
        balance_before: Balance,
        balance_after: Balance,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            transaction_type,
            amount,
            currency: currency.into(),
            status: TransactionStatus::Pending,
            description: description.into(),
            account_id,
            to_account_id,
            balance_before,
            balance_after,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount as seen by the source account: positive for deposits,
    /// negative for withdrawals and outgoing transfers.
    pub fn signed_amount(&self) -> Decimal {
        if self.transaction_type.is_credit() {
            self.amount.value()
        } else {
            -self.amount.value()
        }
    }

    /// `balance_after == balance_before + signed_amount`
    pub fn is_balanced(&self) -> bool {
        self.balance_before.value() + self.signed_amount() == self.balance_after.value()
    }

    pub fn involves(&self, account_id: Uuid) -> bool {
        self.account_id == account_id || self.to_account_id == Some(account_id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    pub fn transition(&mut self, to: TransactionStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(kind: TransactionType, before: Decimal, amount: Decimal, after: Decimal) -> Transaction {
        let to = matches!(kind, TransactionType::Transfer).then(Uuid::new_v4);
        Transaction::pending(
            "0".repeat(32),
            kind,
            Amount::new(amount).unwrap(),
            "USD",
            "",
            Uuid::new_v4(),
            to,
            Balance::new(before).unwrap(),
            Balance::new(after).unwrap(),
        )
    }

    #[test]
    fn test_balance_equation() {
        assert!(record(TransactionType::Deposit, dec!(0), dec!(100), dec!(100)).is_balanced());
        assert!(record(TransactionType::Withdraw, dec!(100), dec!(50), dec!(50)).is_balanced());
        assert!(record(TransactionType::Transfer, dec!(100), dec!(30), dec!(70)).is_balanced());
        assert!(!record(TransactionType::Transfer, dec!(100), dec!(30), dec!(130)).is_balanced());
    }

    #[test]
    fn test_pending_completes_once() {
        let mut tx = record(TransactionType::Deposit, dec!(0), dec!(1), dec!(1));
        assert_eq!(tx.status, TransactionStatus::Pending);

        tx.complete().unwrap();
        assert!(tx.is_completed());

        let err = tx.transition(TransactionStatus::Cancelled).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidStatusTransition {
                from: TransactionStatus::Completed,
                to: TransactionStatus::Cancelled,
            }
        );
    }

    #[test]
    fn test_pending_cannot_stay_pending() {
        assert!(!TransactionStatus::Pending.can_transition_to(TransactionStatus::Pending));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Cancelled));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Failed));
    }

    #[test]
    fn test_involves_destination() {
        let tx = record(TransactionType::Transfer, dec!(10), dec!(5), dec!(5));
        let to = tx.to_account_id.unwrap();
        assert!(tx.involves(tx.account_id));
        assert!(tx.involves(to));
        assert!(!tx.involves(Uuid::new_v4()));
    }

    #[test]
    fn test_serializes_type_field() {
        let tx = record(TransactionType::Withdraw, dec!(10), dec!(5), dec!(5));
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "withdraw");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["amount"], "5.00");
        assert!(json.get("to_account_id").is_none());
    }
}
