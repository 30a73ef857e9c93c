use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;

use crate::types::{Signature, UserRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("user database is corrupt: {0}")]
    Corrupt(String),

    #[error("invalid user name: {0:?}")]
    InvalidName(String),
}

/// Persistent name → [`UserRecord`] mapping.
///
/// Calls are synchronous; a session blocks on them while it resolves.
pub trait UserStore: Send {
    /// Insert or overwrite the record for `name`, stamping it with the current time.
    fn register(&mut self, name: &str, signature: Signature) -> Result<(), StoreError>;

    fn get_all(&self) -> Result<BTreeMap<String, UserRecord>, StoreError>;

    /// Lookup uses the same trimming as [`UserStore::register`].
    fn find(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.get_all()?.remove(name.trim()))
    }

    /// Returns `false` when no such user existed. `name` is trimmed first.
    fn remove(&mut self, name: &str) -> Result<bool, StoreError>;
}

/// Trim a user name and reject empty names or names with control characters.
pub fn validate_name(name: &str) -> Result<&str, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_control) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

/// In-process store; contents are lost on drop.
#[derive(Debug, Default, Clone)]
pub struct MemoryUserStore {
    users: BTreeMap<String, UserRecord>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserStore for MemoryUserStore {
    fn register(&mut self, name: &str, signature: Signature) -> Result<(), StoreError> {
        let name = validate_name(name)?;
        self.users.insert(
            name.to_string(),
            UserRecord {
                signature,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn get_all(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        Ok(self.users.clone())
    }

    fn find(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(name.trim()).cloned())
    }

    fn remove(&mut self, name: &str) -> Result<bool, StoreError> {
        Ok(self.users.remove(name.trim()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_overwrites() {
        let mut store = MemoryUserStore::new();
        store.register("alice", Signature::new(vec![1.0])).unwrap();
        store.register("alice", Signature::new(vec![2.0])).unwrap();

        assert_eq!(store.len(), 1);
        let record = store.find("alice").unwrap().unwrap();
        assert_eq!(record.signature.values(), &[2.0]);
    }

    #[test]
    fn test_register_trims_name() {
        let mut store = MemoryUserStore::new();
        store.register("  bob ", Signature::new(vec![0.5])).unwrap();
        assert!(store.find("bob").unwrap().is_some());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut store = MemoryUserStore::new();
        for name in ["", "   ", "a\nb"] {
            let err = store.register(name, Signature::new(vec![0.0])).unwrap_err();
            assert!(matches!(err, StoreError::InvalidName(_)));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut store = MemoryUserStore::new();
        store.register("alice", Signature::new(vec![0.0])).unwrap();
        assert!(store.remove("alice").unwrap());
        assert!(!store.remove("alice").unwrap());
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_lookup_and_remove_trim_name() {
        let mut store = MemoryUserStore::new();
        store.register(" alice ", Signature::new(vec![0.5])).unwrap();
        assert!(store.find(" alice ").unwrap().is_some());
        assert!(store.remove("alice  ").unwrap());
        assert!(store.is_empty());
    }
}
