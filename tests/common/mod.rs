//! Common test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corebank_ledger::{
    db, Account, AccountType, IdGenerator, Ledger, LedgerConfig, LedgerStore, MemoryLedgerStore,
    NewAccount, NewUser, PgLedgerStore, User,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

/// Config with short timeouts so lock contention tests finish quickly
pub fn test_config() -> LedgerConfig {
    LedgerConfig::default()
        .with_lock_timeout(Duration::from_millis(500))
        .with_operation_timeout(Duration::from_secs(5))
}

pub fn memory_ledger() -> Ledger<MemoryLedgerStore> {
    memory_ledger_with(test_config())
}

pub fn memory_ledger_with(config: LedgerConfig) -> Ledger<MemoryLedgerStore> {
    Ledger::memory(config)
}

pub fn unique_email() -> String {
    format!("user-{}@example.com", Uuid::new_v4().simple())
}

pub async fn create_user<S: LedgerStore>(ledger: &Ledger<S>) -> User {
    ledger
        .users
        .create(NewUser::new(unique_email(), "Test User"))
        .await
        .expect("Failed to create user")
}

pub async fn open_account_for<S: LedgerStore>(
    ledger: &Ledger<S>,
    owner: Uuid,
    balance: Decimal,
    currency: &str,
) -> Account {
    ledger
        .accounts
        .create(
            NewAccount::new(owner, AccountType::Checking)
                .with_initial_balance(balance)
                .with_currency(currency),
        )
        .await
        .expect("Failed to open account")
}

/// New user with one USD checking account
pub async fn open_account<S: LedgerStore>(ledger: &Ledger<S>, balance: Decimal) -> (User, Account) {
    let user = create_user(ledger).await;
    let account = open_account_for(ledger, user.id, balance, "USD").await;
    (user, account)
}

pub async fn balance_of<S: LedgerStore>(ledger: &Ledger<S>, account_id: Uuid) -> Decimal {
    ledger
        .store()
        .find_account(account_id)
        .await
        .expect("Failed to load account")
        .expect("Account missing")
        .balance
        .value()
}

/// Hands out a fixed sequence of ids, then falls back to a counter.
pub struct ScriptedIds {
    account_numbers: std::sync::Mutex<Vec<String>>,
    transaction_ids: std::sync::Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl ScriptedIds {
    pub fn new(account_numbers: &[&str], transaction_ids: &[&str]) -> Arc<Self> {
        let rev = |ids: &[&str]| -> Vec<String> { ids.iter().rev().map(|s| s.to_string()).collect() };
        Arc::new(Self {
            account_numbers: std::sync::Mutex::new(rev(account_numbers)),
            transaction_ids: std::sync::Mutex::new(rev(transaction_ids)),
            counter: AtomicU64::new(1),
        })
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl IdGenerator for ScriptedIds {
    fn new_account_number(&self) -> String {
        let scripted = self.account_numbers.lock().unwrap().pop();
        scripted.unwrap_or_else(|| format!("{:012x}", 0xacc0_0000_0000u64 + self.next()))
    }

    fn new_transaction_id(&self) -> String {
        let scripted = self.transaction_ids.lock().unwrap().pop();
        scripted.unwrap_or_else(|| format!("{:032x}", 0xfeed_0000u128 + self.next() as u128))
    }
}

/// PostgreSQL-backed ledger, or None when DATABASE_URL is not set.
///
/// Every caller works on freshly created users and accounts, so tests can
/// share one database without truncating it.
pub async fn setup_pg_ledger() -> Option<Ledger<PgLedgerStore>> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping PostgreSQL test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::apply_schema(&pool)
        .await
        .expect("Failed to apply schema");

    let config = test_config().with_lock_timeout(Duration::from_secs(2));
    Some(Ledger::postgres(pool, config))
}
