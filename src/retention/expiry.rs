use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::Result;
use crate::stream::paths::decode_complete_file_name;

/// Source of complete documents whose time to live has run out
#[async_trait]
pub trait ExpiryIndex: Send + Sync {
    /// Keys whose complete document should be removed as of `now`
    async fn expired_keys(&self, now: SystemTime) -> Result<Vec<String>>;

    /// Called once a key's document is gone (removed or already absent)
    async fn forget(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Expiry by complete-document modification time
///
/// Finalize writes each document through a fresh rename, so the mtime is the
/// finalization time.
#[derive(Debug, Clone)]
pub struct MtimeExpiry {
    dir: PathBuf,
    ttl: Duration,
}

impl MtimeExpiry {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }
}

#[async_trait]
impl ExpiryIndex for MtimeExpiry {
    async fn expired_keys(&self, now: SystemTime) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut expired = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(decode_complete_file_name) else {
                continue;
            };

            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                // Raced with a removal.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            // A modification time in the future is never expired.
            let Ok(age) = now.duration_since(modified) else {
                continue;
            };
            if age >= self.ttl {
                debug!(key, age_secs = age.as_secs(), "Complete document expired");
                expired.push(key.to_string());
            }
        }

        expired.sort();
        Ok(expired)
    }
}
