//! In-process store
//!
//! Same contract as the PostgreSQL store: per-row exclusive locks taken in
//! ascending id order with a bounded wait, and all-or-nothing units of work.
//! A unit stages its writes privately; commit applies them to the shared
//! tables while the row locks are still held, and dropping a unit discards
//! them.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountStatus, Balance, Transaction, TransactionStatus, TransactionType, User,
    UserStatus, UserUpdate,
};

use super::{
    lock_order, LedgerStore, StoreError, StoreResult, UnitOfWork, ACCOUNTS_NUMBER_KEY,
    TRANSACTIONS_ID_KEY, USERS_EMAIL_KEY,
};

type RowLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    accounts: HashMap<Uuid, Account>,
    /// Commit order
    transactions: Vec<Transaction>,
    transaction_keys: HashMap<String, usize>,
}

impl Tables {
    fn transaction_by_id(&mut self, id: Uuid) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == id)
    }
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<Uuid, RowLock>>,
    lock_timeout: Duration,
}

impl Inner {
    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    fn row_lock(&self, id: Uuid) -> StoreResult<RowLock> {
        let mut locks = self.row_locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locks.entry(id).or_default().clone())
    }

    fn account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }
}

/// Ledger store held entirely in process memory.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    /// Store using the default `LedgerConfig` lock timeout. A ledger with
    /// its own config should come from `Ledger::memory` instead.
    pub fn new() -> Self {
        Self::with_lock_timeout(LedgerConfig::default().lock_timeout)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> StoreResult<MemoryUnit> {
        Ok(MemoryUnit {
            inner: Arc::clone(&self.inner),
            guards: HashMap::new(),
            accounts: HashMap::new(),
            inserted: Vec::new(),
            status_changes: Vec::new(),
        })
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.inner.write()?;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::UniqueViolation("users_pkey".to_string()));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation(USERS_EMAIL_KEY.to_string()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.inner.read()?;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> StoreResult<Option<User>> {
        let mut tables = self.inner.write()?;
        match tables.users.get_mut(&id) {
            Some(user) if user.is_active() => {
                update.apply_to(user);
                Ok(Some(user.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool> {
        let mut tables = self.inner.write()?;
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(false);
        };
        user.status = status;
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut tables = self.inner.write()?;
        if !tables.users.contains_key(&account.owner_user_id) {
            return Err(StoreError::ForeignKeyViolation(
                "accounts_owner_user_id_fkey".to_string(),
            ));
        }
        if tables.accounts.contains_key(&account.id) {
            return Err(StoreError::UniqueViolation("accounts_pkey".to_string()));
        }
        if tables
            .accounts
            .values()
            .any(|a| a.account_number == account.account_number)
        {
            return Err(StoreError::UniqueViolation(ACCOUNTS_NUMBER_KEY.to_string()));
        }
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        self.inner.account(id)
    }

    async fn find_account_by_number(&self, account_number: &str) -> StoreResult<Option<Account>> {
        let tables = self.inner.read()?;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.account_number == account_number)
            .cloned())
    }

    async fn active_accounts_by_owner(&self, owner_user_id: Uuid) -> StoreResult<Vec<Account>> {
        let tables = self.inner.read()?;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.is_owned_by(owner_user_id))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| (a.created_at, a.id));
        Ok(accounts)
    }

    async fn find_transaction(&self, transaction_id: &str) -> StoreResult<Option<Transaction>> {
        let tables = self.inner.read()?;
        Ok(tables
            .transaction_keys
            .get(transaction_id)
            .and_then(|&idx| tables.transactions.get(idx))
            .cloned())
    }

    async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.inner.read()?;

        // newest first; commit order breaks timestamp ties
        let mut matching: Vec<(usize, &Transaction)> = tables
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.involves(account_id))
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));

        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|(_, t)| t.clone())
            .collect())
    }
}

/// Unit of work over [`MemoryLedgerStore`]
pub struct MemoryUnit {
    inner: Arc<Inner>,
    guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    /// Working copies of locked accounts
    accounts: HashMap<Uuid, Account>,
    inserted: Vec<Transaction>,
    /// Status changes to records committed by earlier units
    status_changes: Vec<(Uuid, TransactionStatus)>,
}

impl MemoryUnit {
    fn locked_mut(&mut self, account_id: Uuid) -> StoreResult<&mut Account> {
        self.accounts
            .get_mut(&account_id)
            .ok_or(StoreError::NotLocked(account_id))
    }

    fn key_taken(&self, transaction_id: &str) -> StoreResult<bool> {
        if self.inserted.iter().any(|t| t.transaction_id == transaction_id) {
            return Ok(true);
        }
        Ok(self.inner.read()?.transaction_keys.contains_key(transaction_id))
    }

    fn apply(&self) -> StoreResult<()> {
        let mut tables = self.inner.write()?;

        // a unit holding other rows may have committed the same key meanwhile
        if self
            .inserted
            .iter()
            .any(|t| tables.transaction_keys.contains_key(&t.transaction_id))
        {
            return Err(StoreError::UniqueViolation(TRANSACTIONS_ID_KEY.to_string()));
        }
        for &(id, _) in &self.status_changes {
            match tables.transaction_by_id(id) {
                Some(t) if t.status.is_terminal() => {
                    return Err(StoreError::Immutable(t.transaction_id.clone()));
                }
                Some(_) => {}
                None => return Err(StoreError::RowNotFound(format!("transaction {}", id))),
            }
        }

        for account in self.accounts.values() {
            tables.accounts.insert(account.id, account.clone());
        }
        for &(id, status) in &self.status_changes {
            if let Some(t) = tables.transaction_by_id(id) {
                t.status = status;
                t.updated_at = Utc::now();
            }
        }
        for transaction in &self.inserted {
            let idx = tables.transactions.len();
            tables
                .transaction_keys
                .insert(transaction.transaction_id.clone(), idx);
            tables.transactions.push(transaction.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn lock_accounts(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Account>> {
        let mut locked = Vec::with_capacity(ids.len());

        for id in lock_order(ids) {
            if let Some(account) = self.accounts.get(&id) {
                locked.push(account.clone());
                continue;
            }
            // accounts are never removed, so a missing row stays missing
            if self.inner.account(id)?.is_none() {
                continue;
            }

            let row_lock = self.inner.row_lock(id)?;
            let guard = tokio::time::timeout(self.inner.lock_timeout, row_lock.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout)?;
            tracing::debug!(account_id = %id, "Row lock acquired");

            // re-read: the previous holder may have committed
            let account = self
                .inner
                .account(id)?
                .ok_or_else(|| StoreError::RowNotFound(format!("account {}", id)))?;

            self.guards.insert(id, guard);
            self.accounts.insert(id, account.clone());
            locked.push(account);
        }

        Ok(locked)
    }

    async fn transaction_exists(&mut self, transaction_id: &str) -> StoreResult<bool> {
        self.key_taken(transaction_id)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        if self.key_taken(&transaction.transaction_id)? {
            return Err(StoreError::UniqueViolation(TRANSACTIONS_ID_KEY.to_string()));
        }

        let is_transfer = transaction.transaction_type == TransactionType::Transfer;
        if is_transfer != transaction.to_account_id.is_some() {
            return Err(StoreError::CheckViolation(
                "transactions_destination_check".to_string(),
            ));
        }

        for account_id in std::iter::once(transaction.account_id).chain(transaction.to_account_id) {
            if !self.accounts.contains_key(&account_id) && self.inner.account(account_id)?.is_none() {
                return Err(StoreError::ForeignKeyViolation(
                    "transactions_account_id_fkey".to_string(),
                ));
            }
        }

        self.inserted.push(transaction.clone());
        Ok(())
    }

    async fn update_balance(&mut self, account_id: Uuid, balance: Balance) -> StoreResult<()> {
        let account = self.locked_mut(account_id)?;
        account.balance = balance;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> StoreResult<()> {
        let account = self.locked_mut(account_id)?;
        account.status = status;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
    ) -> StoreResult<()> {
        if let Some(transaction) = self.inserted.iter_mut().find(|t| t.id == id) {
            if transaction.status.is_terminal() {
                return Err(StoreError::Immutable(transaction.transaction_id.clone()));
            }
            transaction.status = status;
            transaction.updated_at = Utc::now();
            return Ok(());
        }

        let committed = {
            let tables = self.inner.read()?;
            tables
                .transactions
                .iter()
                .find(|t| t.id == id)
                .map(|t| (t.status, t.transaction_id.clone()))
        };
        match committed {
            Some((current, key)) if current.is_terminal() => Err(StoreError::Immutable(key)),
            Some(_) => {
                self.status_changes.push((id, status));
                Ok(())
            }
            None => Err(StoreError::RowNotFound(format!("transaction {}", id))),
        }
    }

    async fn commit(self) -> StoreResult<()> {
        // guards are released when `self` drops, after the tables are updated
        self.apply()
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, Amount};
    use rust_decimal_macros::dec;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            full_name: "Test User".into(),
            phone: None,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn account(owner: Uuid, number: &str) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            account_number: number.to_string(),
            account_type: AccountType::Checking,
            balance: Balance::new(dec!(100)).unwrap(),
            opening_balance: Balance::new(dec!(100)).unwrap(),
            currency: "USD".into(),
            status: AccountStatus::Active,
            owner_user_id: owner,
            created_at: now,
            updated_at: now,
        }
    }

    fn deposit(account_id: Uuid, key: &str) -> Transaction {
        Transaction::pending(
            key.to_string(),
            TransactionType::Deposit,
            Amount::from_integer(1).unwrap(),
            "USD",
            "",
            account_id,
            None,
            Balance::new(dec!(100)).unwrap(),
            Balance::new(dec!(101)).unwrap(),
        )
    }

    async fn seeded() -> (MemoryLedgerStore, Account) {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
        let owner = user();
        store.insert_user(&owner).await.unwrap();
        let acc = account(owner.id, "000000000001");
        store.insert_account(&acc).await.unwrap();
        (store, acc)
    }

    #[tokio::test]
    async fn test_dropped_unit_discards_writes() {
        let (store, acc) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        unit.lock_accounts(&[acc.id]).await.unwrap();
        unit.update_balance(acc.id, Balance::new(dec!(5)).unwrap())
            .await
            .unwrap();
        unit.insert_transaction(&deposit(acc.id, &"a".repeat(32)))
            .await
            .unwrap();
        drop(unit);

        let reloaded = store.find_account(acc.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance.value(), dec!(100));
        assert!(store.find_transaction(&"a".repeat(32)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_applies_writes() {
        let (store, acc) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        unit.lock_accounts(&[acc.id]).await.unwrap();
        unit.update_balance(acc.id, Balance::new(dec!(101)).unwrap())
            .await
            .unwrap();
        let tx = deposit(acc.id, &"b".repeat(32));
        unit.insert_transaction(&tx).await.unwrap();
        unit.update_transaction_status(tx.id, TransactionStatus::Completed)
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let stored = store.find_transaction(&"b".repeat(32)).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        let reloaded = store.find_account(acc.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance.value(), dec!(101));
    }

    #[tokio::test]
    async fn test_completed_record_is_immutable() {
        let (store, acc) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        let tx = deposit(acc.id, &"c".repeat(32));
        unit.insert_transaction(&tx).await.unwrap();
        unit.update_transaction_status(tx.id, TransactionStatus::Completed)
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        let err = unit
            .update_transaction_status(tx.id, TransactionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Immutable(_)));
    }

    #[tokio::test]
    async fn test_write_without_lock_rejected() {
        let (store, acc) = seeded().await;

        let mut unit = store.begin().await.unwrap();
        let err = unit.update_balance(acc.id, Balance::zero()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotLocked(id) if id == acc.id));
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let (store, acc) = seeded().await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_accounts(&[acc.id]).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_accounts(&[acc.id]).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout));

        holder.rollback().await.unwrap();
        assert_eq!(waiter.lock_accounts(&[acc.id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let (store, acc) = seeded().await;

        let dup = account(acc.owner_user_id, &acc.account_number);
        let err = store.insert_account(&dup).await.unwrap_err();
        assert!(err.is_unique_violation_on(ACCOUNTS_NUMBER_KEY));

        let orphan = account(Uuid::new_v4(), "000000000002");
        assert!(matches!(
            store.insert_account(&orphan).await,
            Err(StoreError::ForeignKeyViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_accounts_are_skipped() {
        let (store, acc) = seeded().await;
        let mut unit = store.begin().await.unwrap();
        let locked = unit.lock_accounts(&[Uuid::new_v4(), acc.id]).await.unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id, acc.id);
    }
}
