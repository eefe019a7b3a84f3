use std::sync::Mutex;

use crate::services::key_value_store::{KeyValueStore, StorageError};

/// Key under which the collector token is persisted
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Source of the bearer token sent to the collector
pub trait CredentialStore: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, e.g. from the environment
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No token at all; every request fails with an auth error
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl CredentialStore for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Token persisted in a key/value store
pub struct StoredCredentials {
    store: Mutex<Box<dyn KeyValueStore>>,
}

impl StoredCredentials {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Mutex::new(Box::new(store)),
        }
    }

    pub fn save_token(&self, token: &str) -> Result<(), StorageError> {
        let mut store = self.store.lock().map_err(|_| StorageError::Poisoned)?;
        store.set(AUTH_TOKEN_KEY, token)?;
        log::info!("Saved collector token");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let mut store = self.store.lock().map_err(|_| StorageError::Poisoned)?;
        store.remove(AUTH_TOKEN_KEY)
    }
}

impl CredentialStore for StoredCredentials {
    fn bearer_token(&self) -> Option<String> {
        let store = self.store.lock().ok()?;
        match store.get(AUTH_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                log::warn!("Could not read stored token: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::key_value_store::MemoryKeyValueStore;

    #[test]
    fn test_static_credentials() {
        assert_eq!(
            StaticCredentials::new("abc").bearer_token().as_deref(),
            Some("abc")
        );
        assert_eq!(StaticCredentials::anonymous().bearer_token(), None);
    }

    #[test]
    fn test_stored_credentials_round_trip() {
        let backing = MemoryKeyValueStore::new();
        let creds = StoredCredentials::new(backing.clone());
        assert_eq!(creds.bearer_token(), None);

        creds.save_token("secret").unwrap();
        assert_eq!(creds.bearer_token().as_deref(), Some("secret"));
        assert_eq!(
            backing.get(AUTH_TOKEN_KEY).unwrap().as_deref(),
            Some("secret")
        );

        creds.clear().unwrap();
        assert_eq!(creds.bearer_token(), None);
    }

    #[test]
    fn test_empty_stored_token_counts_as_missing() {
        let creds = StoredCredentials::new(MemoryKeyValueStore::new());
        creds.save_token("").unwrap();
        assert_eq!(creds.bearer_token(), None);
    }
}
