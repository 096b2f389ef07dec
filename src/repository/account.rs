//! Account Repository
//!
//! Opening, lookup and administration of accounts. Lookups only ever return
//! active accounts; a deactivated account is reported as not found.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    normalize_currency, Account, AccountStatus, Balance, DomainError, IdGenerator, NewAccount,
    User,
};
use crate::error::{with_deadline, AppError, AppResult};
use crate::store::{LedgerStore, UnitOfWork, ACCOUNTS_NUMBER_KEY};

pub struct AccountRepository<S> {
    store: Arc<S>,
    ids: Arc<dyn IdGenerator>,
    config: LedgerConfig,
}

impl<S> Clone for AccountRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ids: Arc::clone(&self.ids),
            config: self.config.clone(),
        }
    }
}

impl<S: LedgerStore> AccountRepository<S> {
    pub fn new(store: Arc<S>, ids: Arc<dyn IdGenerator>, config: LedgerConfig) -> Self {
        Self { store, ids, config }
    }

    // =========================================================================
    // create
    // =========================================================================

    /// Open an account for an active user.
    ///
    /// A generated account number that collides with an existing one is
    /// replaced and retried up to `max_id_retries` times.
    pub async fn create(&self, new: NewAccount) -> AppResult<Account> {
        let opening_balance = Balance::new(new.initial_balance).map_err(DomainError::from)?;
        let currency = normalize_currency(
            new.currency
                .as_deref()
                .unwrap_or(&self.config.default_currency),
        )?;

        self.store
            .find_user(new.owner_user_id)
            .await?
            .filter(User::is_active)
            .ok_or_else(|| DomainError::UserNotFound(new.owner_user_id.to_string()))?;

        let id = new.id.unwrap_or_else(Uuid::new_v4);
        let mut last_number = String::new();

        for attempt in 0..=self.config.max_id_retries {
            let now = Utc::now();
            let account = Account {
                id,
                account_number: self.ids.new_account_number(),
                account_type: new.account_type,
                balance: opening_balance,
                opening_balance,
                currency: currency.clone(),
                status: AccountStatus::Active,
                owner_user_id: new.owner_user_id,
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_account(&account).await {
                Ok(()) => {
                    tracing::info!(
                        account_id = %account.id,
                        account_number = %account.account_number,
                        owner_user_id = %account.owner_user_id,
                        account_type = %account.account_type,
                        "Account opened"
                    );
                    return Ok(account);
                }
                Err(e) if e.is_unique_violation_on(ACCOUNTS_NUMBER_KEY) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        account_number = %account.account_number,
                        "Account number collision, retrying with a fresh number"
                    );
                    last_number = account.account_number;
                }
                Err(e) if e.is_unique_violation_on("accounts_pkey") => {
                    return Err(DomainError::InvalidParameter(format!(
                        "account id {} already exists",
                        id
                    ))
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DomainError::DuplicateAccountNumber(last_number).into())
    }

    // =========================================================================
    // lookups
    // =========================================================================

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Account> {
        self.store
            .find_account(id)
            .await?
            .filter(Account::is_active)
            .ok_or_else(|| DomainError::account_not_found(id).into())
    }

    pub async fn get_by_number(&self, account_number: &str) -> AppResult<Account> {
        self.store
            .find_account_by_number(account_number)
            .await?
            .filter(Account::is_active)
            .ok_or_else(|| DomainError::account_not_found(account_number).into())
    }

    /// Active accounts owned by the user, oldest first
    pub async fn get_by_owner(&self, owner_user_id: Uuid) -> AppResult<Vec<Account>> {
        Ok(self.store.active_accounts_by_owner(owner_user_id).await?)
    }

    /// Advisory pre-check; takes no lock. The ledger engine repeats the
    /// check under the row lock.
    pub async fn validate_ownership(&self, account_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self
            .store
            .find_account(account_id)
            .await?
            .is_some_and(|account| account.is_owned_by(user_id)))
    }

    // =========================================================================
    // administration
    // =========================================================================

    /// Overwrite a balance under the row lock.
    ///
    /// No transaction record is written, so reconciliation reports the
    /// difference as a balance mismatch.
    pub async fn update_balance(&self, id: Uuid, new_balance: Decimal) -> AppResult<Account> {
        let balance = Balance::new(new_balance).map_err(DomainError::from)?;

        let account = with_deadline(self.config.operation_timeout, "update_balance", async {
            let mut unit = self.store.begin().await?;
            let mut account = lock_active(&mut unit, id).await?;

            unit.update_balance(id, balance).await?;
            unit.commit().await?;

            account.balance = balance;
            account.updated_at = Utc::now();
            Ok::<_, AppError>(account)
        })
        .await?;

        tracing::warn!(
            account_id = %id,
            balance = %balance,
            "Balance overwritten outside the ledger"
        );
        Ok(account)
    }

    /// Soft delete. History stays queryable.
    pub async fn deactivate(&self, id: Uuid) -> AppResult<Account> {
        let account = with_deadline(self.config.operation_timeout, "deactivate_account", async {
            let mut unit = self.store.begin().await?;
            let mut account = lock_active(&mut unit, id).await?;

            unit.update_account_status(id, AccountStatus::Deactivated)
                .await?;
            unit.commit().await?;

            account.status = AccountStatus::Deactivated;
            account.updated_at = Utc::now();
            Ok::<_, AppError>(account)
        })
        .await?;

        tracing::info!(account_id = %id, "Account deactivated");
        Ok(account)
    }
}

async fn lock_active<U: UnitOfWork>(unit: &mut U, id: Uuid) -> AppResult<Account> {
    unit.lock_accounts(&[id])
        .await?
        .into_iter()
        .find(|a| a.id == id && a.is_active())
        .ok_or_else(|| DomainError::account_not_found(id).into())
}
