//! User Repository

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{DomainError, NewUser, User, UserStatus, UserUpdate};
use crate::error::AppResult;
use crate::store::{LedgerStore, USERS_EMAIL_KEY};

pub struct UserRepository<S> {
    store: Arc<S>,
}

impl<S> Clone for UserRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> UserRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Register a user. Emails are unique, compared case-insensitively.
    pub async fn create(&self, new: NewUser) -> AppResult<User> {
        let new = new.normalized()?;

        if self.store.find_user_by_email(&new.email).await?.is_some() {
            return Err(DomainError::EmailTaken(new.email).into());
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            full_name: new.full_name,
            phone: new.phone,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_user(&user).await {
            Ok(()) => {}
            // lost a race with a concurrent registration
            Err(e) if e.is_unique_violation_on(USERS_EMAIL_KEY) => {
                return Err(DomainError::EmailTaken(user.email).into());
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<User> {
        self.store
            .find_user(id)
            .await?
            .filter(User::is_active)
            .ok_or_else(|| DomainError::UserNotFound(id.to_string()).into())
    }

    pub async fn get_by_email(&self, email: &str) -> AppResult<User> {
        let email = email.trim().to_ascii_lowercase();
        self.store
            .find_user_by_email(&email)
            .await?
            .filter(User::is_active)
            .ok_or_else(|| DomainError::UserNotFound(email).into())
    }

    pub async fn update(&self, id: Uuid, update: UserUpdate) -> AppResult<User> {
        if update.is_empty() {
            return Err(DomainError::InvalidParameter("no fields to update".to_string()).into());
        }

        let update = UserUpdate {
            full_name: update.full_name.map(|n| n.trim().to_string()),
            phone: update.phone.map(|p| p.trim().to_string()),
        };
        if update.full_name.as_deref() == Some("") {
            return Err(
                DomainError::InvalidParameter("full name must not be empty".to_string()).into(),
            );
        }

        let user = self
            .store
            .update_user(id, &update)
            .await?
            .ok_or_else(|| DomainError::UserNotFound(id.to_string()))?;

        tracing::info!(user_id = %id, "User updated");
        Ok(user)
    }

    /// Soft delete. The user's accounts are left as they are.
    pub async fn deactivate(&self, id: Uuid) -> AppResult<User> {
        let mut user = self.get_by_id(id).await?;

        if !self
            .store
            .update_user_status(id, UserStatus::Deactivated)
            .await?
        {
            return Err(DomainError::UserNotFound(id.to_string()).into());
        }

        user.status = UserStatus::Deactivated;
        user.updated_at = Utc::now();
        tracing::info!(user_id = %id, "User deactivated");
        Ok(user)
    }
}
