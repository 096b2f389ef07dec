//! Error handling module
//!
//! Centralized error type returned by every public ledger operation.

use std::future::Future;
use std::time::Duration;

use crate::config::ConfigError;
use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Business rule violation or failed lookup
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A row lock could not be acquired in time; nothing was written
    #[error("Timed out waiting for an account lock")]
    LockTimeout,

    /// The whole unit of work exceeded its deadline; nothing was written
    /// unless the deadline hit during commit
    #[error("Operation timed out: {operation}")]
    Timeout { operation: &'static str },

    #[error("Persistence failure: {0}")]
    Persistence(StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout => AppError::LockTimeout,
            other => AppError::Persistence(other),
        }
    }
}

impl AppError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Domain(err) => match err {
                DomainError::InvalidAmount(_) => "invalid_amount",
                DomainError::InvalidAccountType(_) => "invalid_account_type",
                DomainError::AccountNotFound(_) => "account_not_found",
                DomainError::UserNotFound(_) => "user_not_found",
                DomainError::InsufficientBalance { .. } => "insufficient_balance",
                DomainError::SameAccountTransfer => "same_account_transfer",
                DomainError::CurrencyMismatch { .. } => "currency_mismatch",
                DomainError::DuplicateTransactionId(_) => "duplicate_transaction_id",
                DomainError::DuplicateAccountNumber(_) => "duplicate_account_number",
                DomainError::DuplicateOperation { .. } => "duplicate_operation",
                DomainError::EmailTaken(_) => "email_taken",
                DomainError::TransactionNotFound(_) => "transaction_not_found",
                DomainError::InvalidParameter(_) => "invalid_parameter",
                DomainError::InvalidStatusTransition { .. } => "invalid_status_transition",
            },
            AppError::LockTimeout => "lock_timeout",
            AppError::Timeout { .. } => "timeout",
            AppError::Persistence(_) => "persistence_failure",
            AppError::Config(_) => "config_error",
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Domain(err) => err.is_retryable(),
            AppError::LockTimeout | AppError::Timeout { .. } => true,
            AppError::Persistence(err) => err.is_transient(),
            AppError::Config(_) => false,
        }
    }

    /// The domain error, if this is one
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            AppError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

/// Run a unit of work under a deadline.
///
/// Expiry drops the future, which releases its row locks and discards its
/// uncommitted writes.
pub(crate) async fn with_deadline<T, F>(
    limit: Duration,
    operation: &'static str,
    fut: F,
) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "Operation timed out"
            );
            Err(AppError::Timeout { operation })
        }
    }
}
