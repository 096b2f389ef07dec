//! Domain module
//!
//! Ledger records and business rules, free of storage concerns.

pub mod account;
pub mod amount;
pub mod context;
pub mod error;
pub mod ids;
pub mod transaction;
pub mod user;

pub use account::{normalize_currency, Account, AccountStatus, AccountType, NewAccount};
pub use amount::{Amount, AmountError, Balance, MAX_AMOUNT, MAX_SCALE};
pub use context::OperationContext;
pub use error::DomainError;
pub use ids::{IdGenerator, RandomIds};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use user::{NewUser, User, UserStatus, UserUpdate};
