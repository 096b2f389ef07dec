//! Ledger storage
//!
//! The store is the only place shared state lives. Reads go straight to
//! committed data; balance changes go through a [`UnitOfWork`], which holds
//! exclusive row locks on the accounts it touches until it commits or is
//! dropped.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError |
//! |-----------------------|------------|
//! | `23505` unique_violation | `UniqueViolation(constraint)` |
//! | `23503` foreign_key_violation | `ForeignKeyViolation(constraint)` |
//! | `23514` check_violation | `CheckViolation(constraint)` |
//! | `23000` integrity_constraint_violation | `Immutable` (raised by the record trigger) |
//! | `55P03` lock_not_available, `57014` query_canceled | `LockTimeout` |
//! | `40001` serialization_failure, `40P01` deadlock_detected | `SerializationFailure` |
//! | anything else | `Database` |

mod memory;
mod postgres;

pub use memory::{MemoryLedgerStore, MemoryUnit};
pub use postgres::{PgLedgerStore, PgUnit};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, Balance, Transaction, TransactionStatus, User, UserStatus, UserUpdate,
};

/// Unique constraint on `users.email`
pub const USERS_EMAIL_KEY: &str = "users_email_key";
/// Unique constraint on `accounts.account_number`
pub const ACCOUNTS_NUMBER_KEY: &str = "accounts_account_number_key";
/// Unique constraint on `transactions.transaction_id`
pub const TRANSACTIONS_ID_KEY: &str = "transactions_transaction_id_key";

/// Errors raised by a store implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Check constraint violated: {0}")]
    CheckViolation(String),

    /// Attempt to change a record in a terminal status
    #[error("Record is immutable: {0}")]
    Immutable(String),

    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    #[error("Serialization failure or deadlock")]
    SerializationFailure,

    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// Write to an account the unit of work has not locked
    #[error("Account {0} is not locked by this unit of work")]
    NotLocked(Uuid),

    /// Stored data does not satisfy domain invariants
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Unique violation on the given constraint
    pub fn is_unique_violation_on(&self, constraint: &str) -> bool {
        matches!(self, StoreError::UniqueViolation(c) if c == constraint)
    }

    /// Errors a caller may retry as-is
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::LockTimeout | StoreError::SerializationFailure => true,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        map_sqlx_error(err)
    }
}

/// Map a sqlx error to a store error by SQLSTATE.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let sqlx::Error::Database(db_err) = &err else {
        return StoreError::Database(err);
    };

    let code = db_err.code().map(|c| c.into_owned());
    let constraint = db_err.constraint().unwrap_or_default().to_string();
    let message = db_err.message().to_string();

    match code.as_deref() {
        Some("23505") => StoreError::UniqueViolation(constraint),
        Some("23503") => StoreError::ForeignKeyViolation(constraint),
        Some("23514") => StoreError::CheckViolation(constraint),
        Some("23000") => StoreError::Immutable(message),
        Some("55P03") | Some("57014") => StoreError::LockTimeout,
        Some("40001") | Some("40P01") => StoreError::SerializationFailure,
        _ => StoreError::Database(err),
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent ledger state.
///
/// Single-row writes outside a unit of work (`insert_*`, `update_user*`) are
/// atomic on their own. Every balance change goes through [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Unit: UnitOfWork + 'static;

    /// Open a unit of work.
    async fn begin(&self) -> StoreResult<Self::Unit>;

    // users

    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    /// Any status
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Any status; `email` is matched as given
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Apply a profile update to an active user. `None` when there is no such user.
    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> StoreResult<Option<User>>;

    /// Returns false when the user does not exist.
    async fn update_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool>;

    // accounts

    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    /// Any status
    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// Any status
    async fn find_account_by_number(&self, account_number: &str) -> StoreResult<Option<Account>>;

    async fn active_accounts_by_owner(&self, owner_user_id: Uuid) -> StoreResult<Vec<Account>>;

    // transactions

    async fn find_transaction(&self, transaction_id: &str) -> StoreResult<Option<Transaction>>;

    /// Records where the account is source or destination, newest first.
    async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>>;
}

/// An atomic unit of work.
///
/// Dropping a unit without calling [`UnitOfWork::commit`] discards all of
/// its writes and releases its locks.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the given accounts for the rest of the unit and return the ones
    /// that exist, in ascending id order. Ids are locked one at a time in
    /// ascending order regardless of the order given.
    async fn lock_accounts(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Account>>;

    async fn transaction_exists(&mut self, transaction_id: &str) -> StoreResult<bool>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    /// Account writes require a lock taken earlier in the same unit;
    /// anything else fails with [`StoreError::NotLocked`].
    async fn update_balance(&mut self, account_id: Uuid, balance: Balance) -> StoreResult<()>;

    async fn update_account_status(
        &mut self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> StoreResult<()>;

    /// Move a pending record to `status`. Terminal records are rejected
    /// with [`StoreError::Immutable`].
    async fn update_transaction_status(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
    ) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

/// Lock order shared by every store: ascending, deduplicated.
pub(crate) fn lock_order(ids: &[Uuid]) -> Vec<Uuid> {
    let mut ordered = ids.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_sorted_and_deduped() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        assert_eq!(lock_order(&[c, a, b, a]), vec![a, b, c]);
    }

    #[test]
    fn test_transient_errors() {
        assert!(StoreError::LockTimeout.is_transient());
        assert!(StoreError::SerializationFailure.is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::UniqueViolation("x".into()).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_non_database_errors_pass_through() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            StoreError::Database(sqlx::Error::PoolClosed)
        ));
    }

    #[test]
    fn test_unique_violation_on() {
        let err = StoreError::UniqueViolation(TRANSACTIONS_ID_KEY.to_string());
        assert!(err.is_unique_violation_on(TRANSACTIONS_ID_KEY));
        assert!(!err.is_unique_violation_on(ACCOUNTS_NUMBER_KEY));
    }
}
