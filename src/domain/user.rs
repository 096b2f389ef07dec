//! User model
//!
//! Users own accounts. Authentication lives outside the ledger core; only
//! the identity and contact fields are kept here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Deactivated,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "deactivated" => Ok(UserStatus::Deactivated),
            other => Err(format!("Invalid user status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Registration input
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            full_name: full_name.into(),
            phone: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Trim fields and lower-case the email.
    pub fn normalized(self) -> Result<Self, DomainError> {
        let email = self.email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::InvalidParameter(format!(
                "invalid email address '{}'",
                email
            )));
        }

        let full_name = self.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(DomainError::InvalidParameter(
                "full name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            email,
            full_name,
            phone: self.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        })
    }
}

/// Profile changes. Only the named fields can be updated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

impl UserUpdate {
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.phone.is_none()
    }

    /// Apply the update to a user record, bumping `updated_at`.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(full_name) = &self.full_name {
            user.full_name = full_name.clone();
        }
        if let Some(phone) = &self.phone {
            user.phone = Some(phone.clone());
        }
        user.updated_at = Utc::now();
    }
}
