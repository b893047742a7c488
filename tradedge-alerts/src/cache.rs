//! Last-known trade lists and entitlements persisted between runs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use tradedge_core::{EntitlementSnapshot, Trade};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

/// What the dispatcher had on screen for one user.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CachedAlerts {
    pub user_id: String,
    pub saved_at: DateTime<Utc>,
    pub trades: Vec<Trade>,
    pub snapshot: EntitlementSnapshot,
}

impl CachedAlerts {
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.saved_at);
        age.to_std().map(|age| age <= ttl).unwrap_or(true)
    }
}

/// Storage for [`CachedAlerts`], keyed by user.
#[async_trait]
pub trait AlertCache: Send + Sync {
    /// Fresh entry for `user_id`, if any. Expired entries read as `None`.
    async fn load(&self, user_id: &str) -> Result<Option<CachedAlerts>, CacheError>;

    async fn save(&self, entry: &CachedAlerts) -> Result<(), CacheError>;
}

/// One JSON document per user under a directory. Saves are written to a
/// staging file and renamed into place.
#[derive(Clone, Debug)]
pub struct JsonFileCache {
    dir: PathBuf,
    ttl: Duration,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        let key: String = user_id
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
            .collect();
        self.dir.join(format!("alerts-{key}.json"))
    }
}

#[async_trait]
impl AlertCache for JsonFileCache {
    async fn load(&self, user_id: &str) -> Result<Option<CachedAlerts>, CacheError> {
        let path = self.path_for(user_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: CachedAlerts = serde_json::from_slice(&bytes)?;
        if entry.user_id != user_id {
            debug!(path = %path.display(), "cache entry belongs to another user");
            return Ok(None);
        }
        if !entry.is_fresh(Utc::now(), self.ttl) {
            debug!(path = %path.display(), saved_at = %entry.saved_at, "cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn save(&self, entry: &CachedAlerts) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&entry.user_id);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(entry)?).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }
}
