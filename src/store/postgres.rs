//! PostgreSQL store
//!
//! Row locks are `SELECT ... FOR UPDATE`, taken one row at a time in
//! ascending id order. Lock waits are bounded per unit with
//! `SET LOCAL lock_timeout`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, Amount, Balance, Transaction, TransactionStatus, User, UserStatus,
    UserUpdate,
};

use super::{lock_order, LedgerStore, StoreError, StoreResult, UnitOfWork};

const ACCOUNT_COLUMNS: &str = "id, account_number, account_type, balance, opening_balance, \
     currency, status, owner_user_id, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, transaction_id, transaction_type, amount, currency, \
     status, description, account_id, to_account_id, balance_before, balance_after, \
     created_at, updated_at";

const USER_COLUMNS: &str = "id, email, full_name, phone, status, created_at, updated_at";

// =========================================================================
// Row mapping
// =========================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    full_name: String,
    phone: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            phone: row.phone,
            status: row.status.parse::<UserStatus>().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    account_number: String,
    account_type: String,
    balance: Decimal,
    opening_balance: Decimal,
    currency: String,
    status: String,
    owner_user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, detail: String| {
            StoreError::Corrupt(format!("account {} {}: {}", row.id, what, detail))
        };

        Ok(Account {
            id: row.id,
            account_type: row
                .account_type
                .parse()
                .map_err(|e: crate::domain::DomainError| corrupt("type", e.to_string()))?,
            balance: Balance::new(row.balance).map_err(|e| corrupt("balance", e.to_string()))?,
            opening_balance: Balance::new(row.opening_balance)
                .map_err(|e| corrupt("opening balance", e.to_string()))?,
            status: row
                .status
                .parse::<AccountStatus>()
                .map_err(|e| corrupt("status", e))?,
            account_number: row.account_number,
            currency: row.currency,
            owner_user_id: row.owner_user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    transaction_id: String,
    transaction_type: String,
    amount: Decimal,
    currency: String,
    status: String,
    description: String,
    account_id: Uuid,
    to_account_id: Option<Uuid>,
    balance_before: Decimal,
    balance_after: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, detail: String| {
            StoreError::Corrupt(format!("transaction {} {}: {}", row.transaction_id, what, detail))
        };

        Ok(Transaction {
            id: row.id,
            transaction_type: row
                .transaction_type
                .parse()
                .map_err(|e| corrupt("type", e))?,
            amount: Amount::new(row.amount).map_err(|e| corrupt("amount", e.to_string()))?,
            status: row
                .status
                .parse::<TransactionStatus>()
                .map_err(|e| corrupt("status", e))?,
            balance_before: Balance::new(row.balance_before)
                .map_err(|e| corrupt("balance_before", e.to_string()))?,
            balance_after: Balance::new(row.balance_after)
                .map_err(|e| corrupt("balance_after", e.to_string()))?,
            transaction_id: row.transaction_id,
            currency: row.currency,
            description: row.description,
            account_id: row.account_id,
            to_account_id: row.to_account_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =========================================================================
// Store
// =========================================================================

/// PostgreSQL-backed ledger store
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Unit = PgUnit;

    async fn begin(&self) -> StoreResult<PgUnit> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters
        let lock_timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(PgUnit {
            tx,
            locked: HashSet::new(),
        })
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, phone, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.phone)
        .bind(user.status.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        row.map(User::try_from).transpose()
    }

    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                phone = COALESCE($3, phone),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(id)
        .bind(&update.full_name)
        .bind(&update.phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn update_user_status(&self, id: Uuid, status: UserStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, account_number, account_type, balance, opening_balance,
                currency, status, owner_user_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(account.id)
        .bind(&account.account_number)
        .bind(account.account_type.as_str())
        .bind(account.balance.value())
        .bind(account.opening_balance.value())
        .bind(&account.currency)
        .bind(account.status.as_str())
        .bind(account.owner_user_id)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_number(&self, account_number: &str) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE account_number = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn active_accounts_by_owner(&self, owner_user_id: Uuid) -> StoreResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE owner_user_id = $1 AND status = 'active'
            ORDER BY created_at ASC, id ASC
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(owner_user_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn find_transaction(&self, transaction_id: &str) -> StoreResult<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE account_id = $1 OR to_account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }
}

// =========================================================================
// Unit of work
// =========================================================================

/// A database transaction with `lock_timeout` applied.
///
/// Dropping it without commit rolls back when the connection returns to the pool.
pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
    /// Accounts this unit holds `FOR UPDATE`
    locked: HashSet<Uuid>,
}

impl PgUnit {
    fn ensure_locked(&self, account_id: Uuid) -> StoreResult<()> {
        if self.locked.contains(&account_id) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(account_id))
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn lock_accounts(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1 FOR UPDATE", ACCOUNT_COLUMNS);

        let mut locked = Vec::with_capacity(ids.len());
        for id in lock_order(ids) {
            let row: Option<AccountRow> = sqlx::query_as(&query)
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;

            tracing::debug!(account_id = %id, found = row.is_some(), "Row lock acquired");
            if let Some(row) = row {
                let account = Account::try_from(row)?;
                self.locked.insert(account.id);
                locked.push(account);
            }
        }

        Ok(locked)
    }

    async fn transaction_exists(&mut self, transaction_id: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM transactions WHERE transaction_id = $1)",
        )
        .bind(transaction_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, transaction_id, transaction_type, amount, currency, status,
                description, account_id, to_account_id, balance_before, balance_after,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.transaction_id)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount.value())
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(&transaction.description)
        .bind(transaction.account_id)
        .bind(transaction.to_account_id)
        .bind(transaction.balance_before.value())
        .bind(transaction.balance_after.value())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_balance(&mut self, account_id: Uuid, balance: Balance) -> StoreResult<()> {
        self.ensure_locked(account_id)?;
        let result =
            sqlx::query("UPDATE accounts SET balance = $2, updated_at = NOW() WHERE id = $1")
                .bind(account_id)
                .bind(balance.value())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("account {}", account_id)));
        }
        Ok(())
    }

    async fn update_account_status(
        &mut self,
        account_id: Uuid,
        status: AccountStatus,
    ) -> StoreResult<()> {
        self.ensure_locked(account_id)?;
        let result =
            sqlx::query("UPDATE accounts SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(account_id)
                .bind(status.as_str())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("account {}", account_id)));
        }
        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE transactions SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound(format!("transaction {}", id)));
        }
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
