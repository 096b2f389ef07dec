//! Reconciliation
//!
//! Recomputes an account's balance from its opening balance and its
//! completed history, and checks every record's balance equation.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{DomainError, Transaction, TransactionStatus, TransactionType};
use crate::error::AppResult;
use crate::query::{Pagination, QueryService};
use crate::store::LedgerStore;

/// Something reconciliation found wrong
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// `balance_after != balance_before + signed amount`
    UnbalancedRecord {
        transaction_id: String,
        balance_before: Decimal,
        amount: Decimal,
        balance_after: Decimal,
    },
    /// Record left in a non-terminal status
    NotCompleted {
        transaction_id: String,
        status: TransactionStatus,
    },
    /// Stored balance differs from the replayed history
    BalanceMismatch { expected: Decimal, actual: Decimal },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub account_id: Uuid,
    pub opening_balance: Decimal,
    pub expected_balance: Decimal,
    pub actual_balance: Decimal,
    pub transactions_checked: usize,
    pub anomalies: Vec<Anomaly>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Effect of a completed record on `account_id`'s balance
fn effect_on(transaction: &Transaction, account_id: Uuid) -> Decimal {
    let amount = transaction.amount.value();
    match transaction.transaction_type {
        TransactionType::Deposit => amount,
        TransactionType::Withdraw => -amount,
        TransactionType::Transfer if transaction.account_id == account_id => -amount,
        TransactionType::Transfer => amount,
    }
}

pub struct AuditService<S> {
    store: Arc<S>,
    queries: QueryService<S>,
    page_size: i64,
}

impl<S: LedgerStore> AuditService<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self {
            page_size: config.max_page_size,
            queries: QueryService::new(Arc::clone(&store), config),
            store,
        }
    }

    /// Replay the account's history. Postings that commit while the replay
    /// runs can show up as a spurious mismatch.
    pub async fn reconcile_account(&self, account_id: Uuid) -> AppResult<ReconciliationReport> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or_else(|| DomainError::account_not_found(account_id))?;

        let mut expected = account.opening_balance.value();
        let mut anomalies = Vec::new();
        let mut checked = 0;

        let mut page = Pagination::first(self.page_size);
        loop {
            let batch = self.queries.list_transactions(account_id, page).await?;
            let fetched = batch.len() as i64;

            for transaction in &batch {
                checked += 1;

                if !transaction.is_completed() {
                    anomalies.push(Anomaly::NotCompleted {
                        transaction_id: transaction.transaction_id.clone(),
                        status: transaction.status,
                    });
                    continue;
                }

                // the equation is stated against the source account only
                if transaction.account_id == account_id && !transaction.is_balanced() {
                    anomalies.push(Anomaly::UnbalancedRecord {
                        transaction_id: transaction.transaction_id.clone(),
                        balance_before: transaction.balance_before.value(),
                        amount: transaction.amount.value(),
                        balance_after: transaction.balance_after.value(),
                    });
                }

                expected += effect_on(transaction, account_id);
            }

            if fetched < page.limit() {
                break;
            }
            page = page.next();
        }

        let actual = account.balance.value();
        if expected != actual {
            anomalies.push(Anomaly::BalanceMismatch { expected, actual });
        }

        let report = ReconciliationReport {
            account_id,
            opening_balance: account.opening_balance.value(),
            expected_balance: expected,
            actual_balance: actual,
            transactions_checked: checked,
            anomalies,
        };

        if report.is_clean() {
            tracing::info!(
                account_id = %account_id,
                transactions_checked = checked,
                "Account reconciled"
            );
        } else {
            tracing::warn!(
                account_id = %account_id,
                anomalies = report.anomalies.len(),
                expected = %expected,
                actual = %actual,
                "Reconciliation found anomalies"
            );
        }

        Ok(report)
    }
}
