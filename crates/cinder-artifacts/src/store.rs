//! In-memory artifact store.

use crate::keys;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::artifact::{ArtifactKey, StoredArtifact};
use cinder_core::ports::ArtifactStore;
use cinder_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key-addressed store holding every artifact as one immutable entry.
///
/// Entries are `Arc`-shared: a reader that resolved an artifact keeps its
/// view even if the sweep removes the entry a moment later, so deletion
/// is atomic per key from the consumer's perspective.
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<HashMap<ArtifactKey, Arc<StoredArtifact>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a background sweep running `expire` on a fixed interval.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Skip,
            );
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                match store.expire(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "artifact sweep"),
                    Err(e) => warn!(error = %e, "artifact sweep failed"),
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        key: ArtifactKey,
        files: BTreeMap<String, Vec<u8>>,
        expires_at: DateTime<Utc>,
    ) -> Result<Arc<StoredArtifact>> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return Err(Error::ArtifactAlreadyStored(key.to_string()));
        }

        let artifact = Arc::new(StoredArtifact {
            checksum_sha256: keys::checksum(&files),
            key: key.clone(),
            created_at: Utc::now(),
            expires_at,
            files,
        });
        debug!(
            key = %keys::sanitize(&key),
            size_bytes = artifact.size_bytes(),
            "artifact stored"
        );
        entries.insert(key, artifact.clone());
        Ok(artifact)
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<StoredArtifact>>> {
        let entries = self.entries.read().await;
        // Expired-but-unswept entries are already invisible.
        Ok(entries
            .get(key)
            .filter(|a| !a.is_expired(Utc::now()))
            .cloned())
    }

    async fn resolve_latest(
        &self,
        git_ref: &str,
        job: &str,
    ) -> Result<Option<Arc<StoredArtifact>>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|a| {
                a.key.git_ref == git_ref
                    && a.key.job == job
                    && !a.is_expired(now)
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, artifact| !artifact.is_expired(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn files(content: &str) -> BTreeMap<String, Vec<u8>> {
        [("out.txt".to_string(), content.as_bytes().to_vec())]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new("build", "main", "sha1");
        store
            .put(key.clone(), files("hello"), Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();

        let artifact = store.get(&key).await.unwrap().unwrap();
        assert_eq!(artifact.files["out.txt"], b"hello");
        assert!(!artifact.checksum_sha256.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_write_once() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new("build", "main", "sha1");
        let expires = Utc::now() + ChronoDuration::hours(1);
        store.put(key.clone(), files("first"), expires).await.unwrap();

        let err = store.put(key.clone(), files("second"), expires).await;
        assert!(matches!(err, Err(Error::ArtifactAlreadyStored(_))));

        // The original is untouched.
        let artifact = store.get(&key).await.unwrap().unwrap();
        assert_eq!(artifact.files["out.txt"], b"first");
    }

    #[tokio::test]
    async fn test_expiry_is_key_scoped() {
        let store = MemoryArtifactStore::new();
        let now = Utc::now();
        let short = ArtifactKey::new("build", "main", "sha1");
        let long = ArtifactKey::new("build", "main", "sha2");
        store
            .put(short.clone(), files("a"), now + ChronoDuration::minutes(5))
            .await
            .unwrap();
        store
            .put(long.clone(), files("b"), now + ChronoDuration::hours(5))
            .await
            .unwrap();

        let removed = store.expire(now + ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&short).await.unwrap().is_none());
        assert!(store.get(&long).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_invisible_before_sweep() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new("build", "main", "sha1");
        store
            .put(key.clone(), files("a"), Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_latest_prefers_most_recent() {
        let store = MemoryArtifactStore::new();
        let expires = Utc::now() + ChronoDuration::hours(1);
        store
            .put(ArtifactKey::new("build", "main", "old"), files("old"), expires)
            .await
            .unwrap();
        // created_at has millisecond precision; force an ordering.
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .put(ArtifactKey::new("build", "main", "new"), files("new"), expires)
            .await
            .unwrap();

        let latest = store.resolve_latest("main", "build").await.unwrap().unwrap();
        assert_eq!(latest.key.commit_sha, "new");

        assert!(store.resolve_latest("main", "deploy").await.unwrap().is_none());
        assert!(store.resolve_latest("dev", "build").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_view_survives_sweep() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new("build", "main", "sha1");
        let now = Utc::now();
        store
            .put(key.clone(), files("kept"), now + ChronoDuration::minutes(1))
            .await
            .unwrap();

        let view = store.get(&key).await.unwrap().unwrap();
        store.expire(now + ChronoDuration::hours(1)).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        // The earlier reader still has a complete artifact.
        assert_eq!(view.files["out.txt"], b"kept");
    }
}
