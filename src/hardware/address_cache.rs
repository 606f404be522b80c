//! Last-connected account address, persisted between runs.
//!
//! The cached value is display-only: it lets `status` answer without a
//! device. Signing always re-derives the address from the device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SendError, SendResult};
use crate::log_warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccount {
    /// EIP-55 checksummed
    pub address: String,
    pub derivation_path: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AddressCache {
    path: PathBuf,
}

impl AddressCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached account, `None` when absent or unreadable
    pub async fn load(&self) -> SendResult<Option<CachedAccount>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&contents) {
            Ok(account) => Ok(Some(account)),
            Err(e) => {
                log_warn!(
                    "address_cache",
                    "Ignoring unreadable address cache",
                    path = self.path.display(),
                    error = e,
                );
                Ok(None)
            }
        }
    }

    pub async fn store(&self, account: &CachedAccount) -> SendResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(account)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| SendError::internal(format!("Cannot write {}: {}", self.path.display(), e)))
    }

    /// Remove the cache; a missing file is not an error
    pub async fn clear(&self) -> SendResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account() -> CachedAccount {
        CachedAccount {
            address: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string(),
            derivation_path: "m/44'/60'/0'/0/0".to_string(),
            connected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_load_clear() {
        let dir = TempDir::new().unwrap();
        let cache = AddressCache::new(dir.path().join("nested").join("account.json"));

        assert_eq!(cache.load().await.unwrap(), None);
        let stored = account();
        cache.store(&stored).await.unwrap();
        assert_eq!(cache.load().await.unwrap(), Some(stored));

        cache.clear().await.unwrap();
        assert_eq!(cache.load().await.unwrap(), None);
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_cache_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("account.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert_eq!(AddressCache::new(path).load().await.unwrap(), None);
    }
}
