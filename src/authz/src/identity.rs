//! Identity collaborator
//!
//! The service only needs to know whether a user identifier exists, so it can
//! tell an unknown target user apart from a user who simply holds no roles.
//! Lookups run on the connection the mutation already holds, so a check never
//! needs a second lease and sees users created earlier in the same transaction.

use async_trait::async_trait;
use dashmap::DashSet;
use sqlx::{AnyConnection, Row};

use crate::error::{AuthzError, Result};

/// User existence lookup
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `conn` is the caller's leased connection, possibly inside a transaction
    async fn user_exists(&self, conn: &mut AnyConnection, user: &str) -> Result<bool>;
}

/// In-memory set of known users
#[derive(Debug, Default)]
pub struct InMemoryIdentities {
    users: DashSet<String>,
}

impl InMemoryIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identities = Self::new();
        for user in users {
            identities.add(user);
        }
        identities
    }

    pub fn add(&self, user: impl Into<String>) {
        self.users.insert(user.into());
    }

    pub fn remove(&self, user: &str) -> bool {
        self.users.remove(user).is_some()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentities {
    async fn user_exists(&self, _conn: &mut AnyConnection, user: &str) -> Result<bool> {
        Ok(self.users.contains(user))
    }
}

/// Existence check against a users table in the same database
///
/// Table and column names are validated identifiers; the user id is bound
/// as a parameter.
pub struct SqlIdentities {
    statement: String,
}

impl SqlIdentities {
    pub fn new(table: &str, id_column: &str) -> Result<Self> {
        validate_identifier(table)?;
        validate_identifier(id_column)?;

        Ok(Self {
            statement: format!(
                "SELECT COUNT(*) AS found FROM {} WHERE {} = $1",
                table, id_column
            ),
        })
    }
}

#[async_trait]
impl IdentityProvider for SqlIdentities {
    async fn user_exists(&self, conn: &mut AnyConnection, user: &str) -> Result<bool> {
        let row = sqlx::query(&self.statement)
            .bind(user)
            .fetch_one(conn)
            .await?;
        let found: i64 = row.try_get("found")?;
        Ok(found > 0)
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(AuthzError::InvalidConfig(format!(
            "Invalid SQL identifier: '{}'",
            name
        )))
    }
}
