//! Operation Context
//!
//! Caller identity and tracing metadata passed alongside every ledger operation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Account, DomainError};

/// Context for an operation.
///
/// When `caller_user_id` is set, the engine re-checks ownership of the source
/// account while holding its row lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationContext {
    /// Authenticated user the operation is performed for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_user_id: Option<Uuid>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OperationContext {
    /// Context for trusted internal callers (no ownership check)
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self::default().with_caller(user_id)
    }

    pub fn with_caller(mut self, user_id: Uuid) -> Self {
        self.caller_user_id = Some(user_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// A caller that does not own the account sees it as missing.
    pub fn authorize(&self, account: &Account) -> Result<(), DomainError> {
        match self.caller_user_id {
            Some(user_id) if !account.is_owned_by(user_id) => {
                Err(DomainError::account_not_found(account.id))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountStatus, AccountType, Balance};
    use chrono::Utc;

    fn owned_by(owner: Uuid) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            account_number: "a1b2c3d4e5f6".into(),
            account_type: AccountType::Saving,
            balance: Balance::zero(),
            opening_balance: Balance::zero(),
            currency: "USD".into(),
            status: AccountStatus::Active,
            owner_user_id: owner,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_context_builder() {
        let user_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::for_user(user_id).with_correlation_id(correlation_id);

        assert_eq!(context.caller_user_id, Some(user_id));
        assert_eq!(context.correlation_id, Some(correlation_id));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::system();
        let id = context.ensure_correlation_id();
        assert_eq!(context.correlation_id, Some(id));
        assert_eq!(context.ensure_correlation_id(), id);
    }

    #[test]
    fn test_authorize() {
        let owner = Uuid::new_v4();
        let account = owned_by(owner);

        assert!(OperationContext::system().authorize(&account).is_ok());
        assert!(OperationContext::for_user(owner).authorize(&account).is_ok());
        assert!(matches!(
            OperationContext::for_user(Uuid::new_v4()).authorize(&account),
            Err(DomainError::AccountNotFound(_))
        ));
    }
}
