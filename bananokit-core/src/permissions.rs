//! Per-origin connection grants.
//!
//! The permission map is persisted as a versioned CBOR record through the
//! storage collaborator. The relay is its sole writer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{WalletError, WalletResult},
    storage::{WalletStorage, PERMISSIONS_RECORD_KEY},
};

const RECORD_VERSION: u32 = 1;

/// A grant allowing one origin to request operations for specific accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Addresses the origin was approved for.
    pub accounts: Vec<String>,
    /// Unix seconds when the grant was approved.
    pub approved_at: u64,
    /// Unix seconds of the last relayed call under this grant.
    pub last_used: u64,
}

#[derive(Serialize, Deserialize)]
struct PermissionRecord {
    version: u32,
    grants: HashMap<String, Permission>,
}

/// Persistent origin → [`Permission`] map.
pub struct PermissionStore {
    storage: std::sync::Arc<dyn WalletStorage>,
    grants: HashMap<String, Permission>,
}

impl PermissionStore {
    /// Loads the permission map from storage, starting empty if no record
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error on a storage failure or a malformed record.
    pub fn load(storage: std::sync::Arc<dyn WalletStorage>) -> WalletResult<Self> {
        let grants = match storage.get(PERMISSIONS_RECORD_KEY)? {
            None => HashMap::new(),
            Some(bytes) => {
                let record: PermissionRecord = ciborium::de::from_reader(bytes.as_slice())
                    .map_err(|err| WalletError::Serialization(err.to_string()))?;
                if record.version != RECORD_VERSION {
                    return Err(WalletError::Serialization(format!(
                        "unsupported permission record version: {}",
                        record.version
                    )));
                }
                record.grants
            }
        };
        Ok(Self { storage, grants })
    }

    fn persist(&self) -> WalletResult<()> {
        let record = PermissionRecord {
            version: RECORD_VERSION,
            grants: self.grants.clone(),
        };
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&record, &mut bytes)
            .map_err(|err| WalletError::Serialization(err.to_string()))?;
        self.storage.put(PERMISSIONS_RECORD_KEY, &bytes)
    }

    /// The grant for `origin`, if any.
    #[must_use]
    pub fn get(&self, origin: &str) -> Option<&Permission> {
        self.grants.get(origin)
    }

    /// Whether `origin` holds a non-empty grant covering `account`.
    #[must_use]
    pub fn allows(&self, origin: &str, account: &str) -> bool {
        self.grants
            .get(origin)
            .is_some_and(|grant| grant.accounts.iter().any(|a| a == account))
    }

    /// Records an approved grant for `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails; the in-memory map is only
    /// updated on success.
    pub fn grant(
        &mut self,
        origin: &str,
        accounts: Vec<String>,
        now: u64,
    ) -> WalletResult<()> {
        let previous = self.grants.insert(
            origin.to_string(),
            Permission {
                accounts,
                approved_at: now,
                last_used: now,
            },
        );
        if let Err(err) = self.persist() {
            // Roll back so memory and disk stay consistent.
            match previous {
                Some(entry) => {
                    self.grants.insert(origin.to_string(), entry);
                }
                None => {
                    self.grants.remove(origin);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Deletes the grant for `origin`. Removing an absent grant is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    pub fn revoke(&mut self, origin: &str) -> WalletResult<()> {
        if self.grants.remove(origin).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    /// Bumps `last_used` for `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    pub fn touch(&mut self, origin: &str, now: u64) -> WalletResult<()> {
        if let Some(grant) = self.grants.get_mut(origin) {
            grant.last_used = now;
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_grant_persists_across_reload() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = PermissionStore::load(storage.clone()).expect("load");
        store
            .grant("https://a.example", vec!["ban_a".to_string()], 100)
            .expect("grant");

        let reloaded = PermissionStore::load(storage).expect("reload");
        let grant = reloaded.get("https://a.example").expect("present");
        assert_eq!(grant.accounts, vec!["ban_a".to_string()]);
        assert_eq!(grant.approved_at, 100);
        assert!(reloaded.allows("https://a.example", "ban_a"));
        assert!(!reloaded.allows("https://a.example", "ban_b"));
        assert!(!reloaded.allows("https://b.example", "ban_a"));
    }

    #[test]
    fn test_revoke_is_scoped_to_one_origin() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = PermissionStore::load(storage.clone()).expect("load");
        store
            .grant("https://a.example", vec!["ban_a".to_string()], 1)
            .expect("grant a");
        store
            .grant("https://b.example", vec!["ban_b".to_string()], 2)
            .expect("grant b");

        store.revoke("https://a.example").expect("revoke");
        assert!(store.get("https://a.example").is_none());
        assert!(store.allows("https://b.example", "ban_b"));

        let reloaded = PermissionStore::load(storage).expect("reload");
        assert!(reloaded.get("https://a.example").is_none());
        assert!(reloaded.allows("https://b.example", "ban_b"));
    }

    #[test]
    fn test_touch_updates_last_used() {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = PermissionStore::load(storage).expect("load");
        store
            .grant("https://a.example", vec!["ban_a".to_string()], 10)
            .expect("grant");
        store.touch("https://a.example", 99).expect("touch");
        assert_eq!(store.get("https://a.example").expect("grant").last_used, 99);
        // Touching an unknown origin is a no-op.
        store.touch("https://zzz.example", 5).expect("noop");
    }
}
