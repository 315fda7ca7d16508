use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared overlay of secret values handed to tool scripts.
///
/// Clones share the same underlying map, so an update made through the
/// settings endpoint is seen by every script started afterwards.
#[derive(Clone, Default)]
pub struct SecretStore {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process values of `keys`.
    pub fn from_env(keys: &[&str]) -> Self {
        let store = Self::new();
        for key in keys {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    store.set(*key, value);
                }
            }
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// A point-in-time copy of every stored value.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Custom Debug implementation to redact secrets from logs.
impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.snapshot().into_keys().collect();
        f.debug_struct("SecretStore").field("keys", &keys).finish()
    }
}
