//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use super::amount::AmountError;
use super::transaction::TransactionStatus;

/// Ledger business rule violations and lookup failures.
///
/// These errors are scoped to the single operation that produced them and
/// never leave a partially applied unit of work behind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative, malformed or out of range
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Account type is not one of checking / saving
    #[error("Invalid account type: {0}")]
    InvalidAccountType(String),

    /// Account missing, deactivated, not owned by the caller, or malformed id
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// User missing or deactivated
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Insufficient balance for debit operation
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// Transfer to same account
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Transfer between accounts held in different currencies
    #[error("Currency mismatch: source holds {expected}, destination holds {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// Generated transaction id collided with an existing one
    #[error("Duplicate transaction id: {0}")]
    DuplicateTransactionId(String),

    /// Generated account number collided with an existing one
    #[error("Duplicate account number: {0}")]
    DuplicateAccountNumber(String),

    /// Caller-supplied idempotency key was already used
    #[error("Duplicate operation: {key}")]
    DuplicateOperation { key: String },

    /// Email already registered to another user
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    /// Transaction lookup failed
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Bad pagination bounds, identifiers or other request parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Transaction status change not allowed by the state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance { required, available }
    }

    /// Create an account not found error from any displayable id
    pub fn account_not_found(id: impl ToString) -> Self {
        Self::AccountNotFound(id.to_string())
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidAccountType(_)
                | Self::InsufficientBalance { .. }
                | Self::SameAccountTransfer
                | Self::CurrencyMismatch { .. }
                | Self::EmailTaken(_)
                | Self::InvalidParameter(_)
        )
    }

    /// Check if this is a lookup failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::UserNotFound(_) | Self::TransactionNotFound(_)
        )
    }

    /// Check if this is a conflict error
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTransactionId(_)
                | Self::DuplicateAccountNumber(_)
                | Self::DuplicateOperation { .. }
                | Self::InvalidStatusTransition { .. }
        )
    }

    /// Identifier collisions are safe to retry with a fresh identifier.
    /// A reused caller key is not: the original operation already happened.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTransactionId(_) | Self::DuplicateAccountNumber(_)
        )
    }
}

impl From<AmountError> for DomainError {
    fn from(err: AmountError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let err = DomainError::insufficient_balance(Decimal::new(150, 0), Decimal::new(50, 0));

        assert!(err.is_client_error());
        assert!(!err.is_conflict_error());
        assert!(err.to_string().contains("150"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_retryable_collisions() {
        assert!(DomainError::DuplicateTransactionId("ab".into()).is_retryable());
        assert!(DomainError::DuplicateAccountNumber("cd".into()).is_retryable());

        let replay = DomainError::DuplicateOperation { key: "ef".into() };
        assert!(replay.is_conflict_error());
        assert!(!replay.is_retryable());
    }

    #[test]
    fn test_amount_error_becomes_invalid_amount() {
        let err: DomainError = AmountError::NotPositive(Decimal::ZERO).into();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(DomainError::account_not_found(uuid::Uuid::nil()).is_not_found());
        assert!(DomainError::TransactionNotFound("x".into()).is_not_found());
        assert!(!DomainError::SameAccountTransfer.is_not_found());
    }
}
