//! Narrow contract for the durable key-value collaborator.
//!
//! The wallet core never talks to browser storage directly; embedders supply
//! an implementation of [`WalletStorage`] and the core persists opaque byte
//! blobs through it.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{WalletError, WalletResult};

/// Storage key for the encrypted wallet record.
pub const WALLET_RECORD_KEY: &str = "wallet";
/// Storage key for the permission map.
pub const PERMISSIONS_RECORD_KEY: &str = "permissions";

/// Durable key-value storage for wallet records.
pub trait WalletStorage: Send + Sync {
    /// Reads the blob at `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>>;

    /// Writes `bytes` at `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, key: &str, bytes: &[u8]) -> WalletResult<()>;

    /// Deletes the blob at `key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, key: &str) -> WalletResult<()>;
}

/// In-memory [`WalletStorage`] used by tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletStorage for MemoryStorage {
    fn get(&self, key: &str) -> WalletResult<Option<Vec<u8>>> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| WalletError::Storage("mutex poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> WalletResult<()> {
        self.blobs
            .lock()
            .map_err(|_| WalletError::Storage("mutex poisoned".to_string()))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> WalletResult<()> {
        self.blobs
            .lock()
            .map_err(|_| WalletError::Storage("mutex poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").expect("get"), None);
        storage.put("k", &[1, 2, 3]).expect("put");
        assert_eq!(storage.get("k").expect("get"), Some(vec![1, 2, 3]));
        storage.delete("k").expect("delete");
        assert_eq!(storage.get("k").expect("get"), None);
        storage.delete("k").expect("delete absent");
    }
}
