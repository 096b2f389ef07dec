//! corebank ledger core
//!
//! Accounts, deposits, withdrawals and transfers with row-level locking,
//! over PostgreSQL or an in-process store.
//!
//! ```no_run
//! use corebank_ledger::{Ledger, LedgerConfig};
//! use std::time::Duration;
//!
//! let config = LedgerConfig::default().with_lock_timeout(Duration::from_millis(500));
//! let ledger = Ledger::memory(config);
//! # let _ = ledger;
//! ```

pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod ledger;
pub mod query;
pub mod repository;
pub mod store;

mod error;

use std::sync::Arc;

pub use audit::{Anomaly, AuditService, ReconciliationReport};
pub use config::{Config, LedgerConfig};
pub use domain::{
    Account, AccountStatus, AccountType, Amount, AmountError, Balance, DomainError, IdGenerator,
    NewAccount, NewUser, OperationContext, Transaction, TransactionStatus, TransactionType, User,
    UserStatus, UserUpdate,
};
pub use error::{AppError, AppResult};
pub use ledger::{DepositCommand, LedgerEngine, TransferCommand, WithdrawCommand};
pub use query::{Pagination, QueryService};
pub use repository::{AccountRepository, UserRepository};
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore, StoreError, UnitOfWork};

/// All ledger services over one shared store
pub struct Ledger<S> {
    pub users: UserRepository<S>,
    pub accounts: AccountRepository<S>,
    pub engine: LedgerEngine<S>,
    pub queries: QueryService<S>,
    pub audit: AuditService<S>,
    store: Arc<S>,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self::with_id_generator(store, Arc::new(domain::RandomIds), config)
    }

    /// Use a custom source of account numbers and transaction ids
    pub fn with_id_generator(store: S, ids: Arc<dyn IdGenerator>, config: LedgerConfig) -> Self {
        let store = Arc::new(store);
        Self {
            users: UserRepository::new(Arc::clone(&store)),
            accounts: AccountRepository::new(Arc::clone(&store), Arc::clone(&ids), config.clone()),
            engine: LedgerEngine::with_id_generator(Arc::clone(&store), ids, config.clone()),
            queries: QueryService::new(Arc::clone(&store), config.clone()),
            audit: AuditService::new(Arc::clone(&store), config),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl Ledger<MemoryLedgerStore> {
    /// In-process ledger whose row locks wait at most `config.lock_timeout`
    pub fn memory(config: LedgerConfig) -> Self {
        let store = MemoryLedgerStore::with_lock_timeout(config.lock_timeout);
        Self::new(store, config)
    }
}

impl Ledger<PgLedgerStore> {
    /// Ledger over an existing pool, using the configured lock timeout
    pub fn postgres(pool: sqlx::PgPool, config: LedgerConfig) -> Self {
        let store = PgLedgerStore::new(pool, config.lock_timeout);
        Self::new(store, config)
    }
}
