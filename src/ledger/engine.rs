//! Ledger Engine
//!
//! Deposit, withdraw and transfer, each as a single unit of work:
//!
//! 1. lock every account involved, ascending by id
//! 2. re-validate against the locked rows (status, ownership, currency, funds)
//! 3. insert the record as `pending`, write the balances, complete the record
//! 4. commit, or roll back on any failure
//!
//! A failed operation leaves no record and no balance change behind.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::ids::is_valid_transaction_id;
use crate::domain::{
    Account, Amount, DomainError, IdGenerator, OperationContext, RandomIds, Transaction,
    TransactionType,
};
use crate::error::{with_deadline, AppError, AppResult};
use crate::store::{LedgerStore, StoreError, UnitOfWork, TRANSACTIONS_ID_KEY};

use super::{DepositCommand, TransferCommand, WithdrawCommand};

/// A validated money movement
#[derive(Debug)]
struct Posting {
    kind: TransactionType,
    account_id: Uuid,
    to_account_id: Option<Uuid>,
    amount: Amount,
    description: String,
}

/// Where the record's key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    Caller,
    Generated,
}

pub struct LedgerEngine<S> {
    store: Arc<S>,
    ids: Arc<dyn IdGenerator>,
    config: LedgerConfig,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ids: Arc::clone(&self.ids),
            config: self.config.clone(),
        }
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self::with_id_generator(store, Arc::new(RandomIds), config)
    }

    pub fn with_id_generator(
        store: Arc<S>,
        ids: Arc<dyn IdGenerator>,
        config: LedgerConfig,
    ) -> Self {
        Self { store, ids, config }
    }

    // =========================================================================
    // deposit
    // =========================================================================

    pub async fn deposit(
        &self,
        command: DepositCommand,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let posting = Posting {
            kind: TransactionType::Deposit,
            account_id: command.account_id,
            to_account_id: None,
            amount: validate_amount(command.amount)?,
            description: command.description,
        };

        self.execute(posting, command.transaction_id, context).await
    }

    // =========================================================================
    // withdraw
    // =========================================================================

    pub async fn withdraw(
        &self,
        command: WithdrawCommand,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let posting = Posting {
            kind: TransactionType::Withdraw,
            account_id: command.account_id,
            to_account_id: None,
            amount: validate_amount(command.amount)?,
            description: command.description,
        };

        self.execute(posting, command.transaction_id, context).await
    }

    // =========================================================================
    // transfer
    // =========================================================================

    /// One record, attributed to the source account, with `to_account_id`
    /// naming the destination.
    pub async fn transfer(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let posting = Posting {
            kind: TransactionType::Transfer,
            account_id: command.from_account_id,
            to_account_id: Some(command.to_account_id),
            amount: validate_amount(command.amount)?,
            description: command.description,
        };

        self.execute(posting, command.transaction_id, context).await
    }

    // =========================================================================
    // shared flow
    // =========================================================================

    /// Run the posting, retrying with a fresh key when a generated one collides.
    /// A caller-supplied key is used exactly once.
    async fn execute(
        &self,
        posting: Posting,
        caller_key: Option<String>,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let attempts = match &caller_key {
            Some(key) if !is_valid_transaction_id(key) => {
                return Err(DomainError::InvalidParameter(format!(
                    "transaction id must be 32 lowercase hex characters, got '{}'",
                    key
                ))
                .into());
            }
            Some(_) => 1,
            None => self.config.max_id_retries + 1,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let (key, source) = match &caller_key {
                Some(key) => (key.clone(), KeySource::Caller),
                None => (self.ids.new_transaction_id(), KeySource::Generated),
            };

            let result = with_deadline(
                self.config.operation_timeout,
                posting.kind.as_str(),
                self.post(&posting, &key, source, context),
            )
            .await;

            match result {
                Err(AppError::Domain(DomainError::DuplicateTransactionId(_)))
                    if attempt < attempts =>
                {
                    tracing::warn!(
                        attempt,
                        transaction_id = %key,
                        "Transaction id collision, retrying with a fresh id"
                    );
                }
                Ok(transaction) => {
                    tracing::info!(
                        transaction_id = %transaction.transaction_id,
                        transaction_type = %transaction.transaction_type,
                        account_id = %transaction.account_id,
                        to_account_id = ?transaction.to_account_id,
                        amount = %transaction.amount,
                        balance_after = %transaction.balance_after,
                        correlation_id = ?context.correlation_id,
                        "Transaction completed"
                    );
                    return Ok(transaction);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One attempt inside one unit of work.
    async fn post(
        &self,
        posting: &Posting,
        key: &str,
        source: KeySource,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let mut unit = self.store.begin().await?;

        match self.apply(&mut unit, posting, key, source, context).await {
            Ok(transaction) => unit
                .commit()
                .await
                .map(|()| transaction)
                .map_err(|e| key_conflict(e, key, source)),
            Err(err) => {
                match unit.rollback().await {
                    Ok(()) => tracing::warn!(
                        transaction_id = %key,
                        error_code = err.error_code(),
                        correlation_id = ?context.correlation_id,
                        "Transaction rolled back: {}",
                        err
                    ),
                    Err(rollback_err) => tracing::error!(
                        transaction_id = %key,
                        error = %rollback_err,
                        "Rollback failed"
                    ),
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        unit: &mut S::Unit,
        posting: &Posting,
        key: &str,
        source: KeySource,
        context: &OperationContext,
    ) -> AppResult<Transaction> {
        let involved: Vec<Uuid> = std::iter::once(posting.account_id)
            .chain(posting.to_account_id)
            .collect();
        let locked = unit.lock_accounts(&involved).await?;

        if source == KeySource::Caller && unit.transaction_exists(key).await? {
            return Err(DomainError::DuplicateOperation {
                key: key.to_string(),
            }
            .into());
        }

        let from = active(&locked, posting.account_id)?;
        let to = match posting.to_account_id {
            Some(id) => Some(active(&locked, id)?),
            None => None,
        };

        if let Some(to) = to {
            if to.id == from.id {
                return Err(DomainError::SameAccountTransfer.into());
            }
        }

        context.authorize(from)?;

        if let Some(to) = to {
            if to.currency != from.currency {
                return Err(DomainError::CurrencyMismatch {
                    expected: from.currency.clone(),
                    found: to.currency.clone(),
                }
                .into());
            }
        }

        let balance_after = if posting.kind.is_credit() {
            from.credited(&posting.amount)?
        } else {
            from.debited(&posting.amount)?
        };

        let mut transaction = Transaction::pending(
            key.to_string(),
            posting.kind,
            posting.amount,
            from.currency.as_str(),
            posting.description.as_str(),
            from.id,
            to.map(|t| t.id),
            from.balance,
            balance_after,
        );

        unit.insert_transaction(&transaction)
            .await
            .map_err(|e| key_conflict(e, key, source))?;
        unit.update_balance(from.id, balance_after).await?;
        if let Some(to) = to {
            unit.update_balance(to.id, to.credited(&posting.amount)?)
                .await?;
        }

        transaction.complete()?;
        unit.update_transaction_status(transaction.id, transaction.status)
            .await?;

        Ok(transaction)
    }
}

fn validate_amount(value: Decimal) -> Result<Amount, DomainError> {
    Ok(Amount::new(value)?)
}

fn active(locked: &[Account], id: Uuid) -> Result<&Account, DomainError> {
    locked
        .iter()
        .find(|a| a.id == id)
        .filter(|a| a.is_active())
        .ok_or_else(|| DomainError::account_not_found(id))
}

/// A unique violation on the record key means the key is taken: a replay
/// when the caller chose it, a collision when it was generated.
fn key_conflict(err: StoreError, key: &str, source: KeySource) -> AppError {
    if !err.is_unique_violation_on(TRANSACTIONS_ID_KEY) {
        return err.into();
    }
    match source {
        KeySource::Caller => DomainError::DuplicateOperation {
            key: key.to_string(),
        }
        .into(),
        KeySource::Generated => DomainError::DuplicateTransactionId(key.to_string()).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec!(0.01)).is_ok());
        assert!(matches!(validate_amount(dec!(0)), Err(DomainError::InvalidAmount(_))));
        assert!(matches!(validate_amount(dec!(-5)), Err(DomainError::InvalidAmount(_))));
        assert!(matches!(validate_amount(dec!(1.001)), Err(DomainError::InvalidAmount(_))));
    }

    #[test]
    fn test_key_conflict_mapping() {
        let key = "0".repeat(32);
        let violation = || StoreError::UniqueViolation(TRANSACTIONS_ID_KEY.to_string());

        assert!(matches!(
            key_conflict(violation(), &key, KeySource::Caller),
            AppError::Domain(DomainError::DuplicateOperation { .. })
        ));
        assert!(matches!(
            key_conflict(violation(), &key, KeySource::Generated),
            AppError::Domain(DomainError::DuplicateTransactionId(_))
        ));
        assert!(matches!(
            key_conflict(StoreError::LockTimeout, &key, KeySource::Caller),
            AppError::LockTimeout
        ));
    }
}
