//! Account storage.
//!
//! The server talks to accounts only through [`AccountStore`], so a
//! persistent backend can replace the in-memory one without touching the
//! lobby code.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_CREDENTIAL_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("account already exists")]
    AlreadyExists,

    #[error("invalid credential format: {0}")]
    InvalidParameter(&'static str),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn register(&self, username: &str, password: &str) -> Result<(), AuthError>;

    async fn login(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

fn validate(field: &'static str, value: &str) -> Result<(), AuthError> {
    if value.is_empty() || value.len() > MAX_CREDENTIAL_LEN || value.contains(':') {
        return Err(AuthError::InvalidParameter(field));
    }
    Ok(())
}

/// Process-lifetime accounts.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<String, String>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `(username, password)` pairs.
    pub fn with_accounts<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let accounts = pairs
            .into_iter()
            .map(|(u, p)| (u.to_owned(), p.to_owned()))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccounts {
    async fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate("username", username)?;
        validate("password", password)?;
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(username) {
            return Err(AuthError::AlreadyExists);
        }
        accounts.insert(username.to_owned(), password.to_owned());
        Ok(())
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate("username", username)?;
        let accounts = self.accounts.read().await;
        match accounts.get(username) {
            Some(stored) if stored == password => Ok(()),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_login() {
        let store = InMemoryAccounts::new();
        assert_eq!(store.register("ann", "pw").await, Ok(()));
        assert_eq!(store.login("ann", "pw").await, Ok(()));
        assert_eq!(store.login("ann", "nope").await, Err(AuthError::InvalidCredentials));
        assert_eq!(store.login("bob", "pw").await, Err(AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn duplicates_and_separators_are_rejected() {
        let store = InMemoryAccounts::with_accounts([("ann", "pw")]);
        assert_eq!(store.register("ann", "x").await, Err(AuthError::AlreadyExists));
        assert_eq!(
            store.register("a:b", "x").await,
            Err(AuthError::InvalidParameter("username"))
        );
        assert_eq!(
            store.register("carl", "").await,
            Err(AuthError::InvalidParameter("password"))
        );
    }
}
