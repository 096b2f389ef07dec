//! Query Service
//!
//! Read-only access to transaction history. Reads see committed data only
//! and take no locks.

use std::sync::Arc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{DomainError, Transaction};
use crate::error::AppResult;
use crate::store::LedgerStore;

/// Page bounds for history queries.
///
/// Only built through [`Pagination::new`] or [`QueryService::page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    limit: i64,
    offset: i64,
}

impl Pagination {
    /// Validate raw bounds against the configured defaults.
    ///
    /// A missing or zero limit means the default page size.
    pub fn new(
        limit: Option<i64>,
        offset: Option<i64>,
        config: &LedgerConfig,
    ) -> Result<Self, DomainError> {
        let limit = match limit {
            None | Some(0) => config.default_page_size,
            Some(l) if l < 0 => {
                return Err(DomainError::InvalidParameter(format!(
                    "limit must not be negative, got {}",
                    l
                )))
            }
            Some(l) if l > config.max_page_size => {
                return Err(DomainError::InvalidParameter(format!(
                    "limit must be at most {}, got {}",
                    config.max_page_size, l
                )))
            }
            Some(l) => l,
        };

        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(DomainError::InvalidParameter(format!(
                "offset must not be negative, got {}",
                offset
            )));
        }

        Ok(Self { limit, offset })
    }

    pub(crate) fn first(limit: i64) -> Self {
        Self { limit, offset: 0 }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn next(&self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + self.limit,
        }
    }
}

pub struct QueryService<S> {
    store: Arc<S>,
    config: LedgerConfig,
}

impl<S> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: LedgerStore> QueryService<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Build a page from raw caller input
    pub fn page(&self, limit: Option<i64>, offset: Option<i64>) -> AppResult<Pagination> {
        Ok(Pagination::new(limit, offset, &self.config)?)
    }

    /// History of an account as source or destination, newest first.
    ///
    /// Deactivated accounts keep their history readable.
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        page: Pagination,
    ) -> AppResult<Vec<Transaction>> {
        let page = Pagination::new(Some(page.limit), Some(page.offset), &self.config)?;
        if self.store.find_account(account_id).await?.is_none() {
            return Err(DomainError::account_not_found(account_id).into());
        }

        Ok(self
            .store
            .transactions_for_account(account_id, page.limit, page.offset)
            .await?)
    }

    /// Lookup by transaction id. No ownership check.
    pub async fn get_transaction(&self, transaction_id: &str) -> AppResult<Transaction> {
        self.store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| DomainError::TransactionNotFound(transaction_id.to_string()).into())
    }

    /// Lookup restricted to records touching an active account the user owns.
    /// Anything else is reported as not found.
    pub async fn get_transaction_for_user(
        &self,
        transaction_id: &str,
        user_id: Uuid,
    ) -> AppResult<Transaction> {
        let transaction = self.get_transaction(transaction_id).await?;

        for account_id in std::iter::once(transaction.account_id).chain(transaction.to_account_id)
        {
            let owned = self
                .store
                .find_account(account_id)
                .await?
                .is_some_and(|a| a.is_owned_by(user_id));
            if owned {
                return Ok(transaction);
            }
        }

        Err(DomainError::TransactionNotFound(transaction_id.to_string()).into())
    }
}
