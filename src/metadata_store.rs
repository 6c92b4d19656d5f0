//! Metadata store (§4.C). Each AFI owns two instances side by side: a
//! parse cache and a user override; the override wins on merge
//! ([`crate::metadata::PartialMetadata::merged_with_override`]).
//!
//! Path validation (the §4.C `InvalidPath` rule) is the AFI's
//! responsibility: by the time a root-relative path reaches this store
//! it has already been resolved against the root.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::warn;

use crate::config::Config;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::metadata::PartialMetadata;
use crate::persist::Persist;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    entries: HashMap<String, PartialMetadata>,
    failures: Vec<String>,
}

struct StoreState {
    entries: HashMap<String, PartialMetadata>,
    failures: HashSet<String>,
    loaded: bool,
}

pub struct MetadataStore {
    persist: Arc<dyn Persist>,
    key: String,
    state: AsyncRwLock<StoreState>,
    debouncer: Option<Debouncer>,
}

impl MetadataStore {
    pub fn new(persist: Arc<dyn Persist>, key: impl Into<String>, config: &Config) -> Arc<Self> {
        let key = key.into();
        Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let save_persist = persist.clone();
            let save_key = key.clone();
            let debouncer = Debouncer::new(config.debounce_interval, move || {
                let weak = weak.clone();
                let persist = save_persist.clone();
                let key = save_key.clone();
                async move {
                    if let Some(store) = weak.upgrade() {
                        if let Err(e) = store.save_to(&persist, &key).await {
                            warn!(error = %e, key = %key, "failed to save metadata store");
                        }
                    }
                }
            });
            Self {
                persist,
                key,
                state: AsyncRwLock::new(StoreState {
                    entries: HashMap::new(),
                    failures: HashSet::new(),
                    loaded: false,
                }),
                debouncer: Some(debouncer),
            }
        })
    }

    /// Idempotent: a second `load()` after a successful one is a no-op.
    /// A missing persisted blob is a successful empty load that
    /// schedules an initial save.
    pub async fn load(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(());
            }
        }

        let raw = self.persist.get_item(&self.key).await?;
        let mut state = self.state.write().await;
        if state.loaded {
            return Ok(());
        }
        match raw {
            Some(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot) => {
                    state.entries = snapshot.entries;
                    state.failures = snapshot.failures.into_iter().collect();
                    state.loaded = true;
                }
                Err(e) => {
                    warn!(error = %e, key = %self.key, "metadata store blob corrupt, treating as empty");
                    state.loaded = true;
                }
            },
            None => {
                state.loaded = true;
                drop(state);
                self.mark_dirty().await;
            }
        }
        Ok(())
    }

    async fn save_to(&self, persist: &Arc<dyn Persist>, key: &str) -> Result<()> {
        let body = {
            let state = self.state.read().await;
            let snapshot = Snapshot {
                entries: state.entries.clone(),
                failures: state.failures.iter().cloned().collect(),
            };
            serde_json::to_string(&snapshot).map_err(|e| crate::error::Error::Corrupt(e.to_string()))?
        };
        persist.set_item(key, body).await
    }

    async fn mark_dirty(&self) {
        if let Some(d) = &self.debouncer {
            d.mark_dirty().await;
        }
    }

    pub async fn flush(&self) {
        if let Some(d) = &self.debouncer {
            d.trigger().await;
        }
    }

    pub async fn destroy(&self) {
        self.flush().await;
    }

    pub async fn get(&self, relative_path: &str) -> Option<PartialMetadata> {
        self.state.read().await.entries.get(relative_path).cloned()
    }

    pub async fn is_do_not_retry(&self, relative_path: &str) -> bool {
        self.state.read().await.failures.contains(relative_path)
    }

    pub async fn mark_do_not_retry(&self, relative_path: &str) {
        let mut state = self.state.write().await;
        state.failures.insert(relative_path.to_string());
        drop(state);
        self.mark_dirty().await;
    }

    /// No-op (returns `false`) when `md` is semantically equal to the
    /// stored value (§4.C equality semantics); otherwise stores it,
    /// clears any do-not-retry mark for the path, and returns `true`.
    pub async fn set(&self, relative_path: &str, md: PartialMetadata) -> bool {
        let mut state = self.state.write().await;
        if let Some(existing) = state.entries.get(relative_path) {
            if existing.semantically_equal(&md) {
                return false;
            }
        }
        state.entries.insert(relative_path.to_string(), md);
        state.failures.remove(relative_path);
        drop(state);
        self.mark_dirty().await;
        true
    }

    pub async fn remove(&self, relative_path: &str) {
        let mut state = self.state.write().await;
        let changed = state.entries.remove(relative_path).is_some()
            || state.failures.remove(relative_path);
        drop(state);
        if changed {
            self.mark_dirty().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;

    #[tokio::test]
    async fn set_is_a_no_op_for_semantically_equal_metadata() {
        let store = MetadataStore::new(Arc::new(MemoryPersist::default()), "cache", &Config::default());
        let mut md = PartialMetadata::new("a.mp3");
        md.artists = Some(vec!["A".into(), "B".into()]);
        assert!(store.set("a.mp3", md.clone()).await);

        let mut same = PartialMetadata::new("a.mp3");
        same.artists = Some(vec!["B".into(), "A".into()]);
        assert!(!store.set("a.mp3", same).await);
    }

    #[tokio::test]
    async fn successful_set_clears_do_not_retry() {
        let store = MetadataStore::new(Arc::new(MemoryPersist::default()), "cache", &Config::default());
        store.mark_do_not_retry("a.mp3").await;
        assert!(store.is_do_not_retry("a.mp3").await);
        store.set("a.mp3", PartialMetadata::new("a.mp3")).await;
        assert!(!store.is_do_not_retry("a.mp3").await);
    }

    #[tokio::test]
    async fn load_is_idempotent_and_round_trips() {
        let persist: Arc<dyn Persist> = Arc::new(MemoryPersist::default());
        let store = MetadataStore::new(persist.clone(), "cache", &Config::default());
        store.load().await.unwrap();
        store.set("a.mp3", PartialMetadata::new("a.mp3")).await;
        store.flush().await;

        let reloaded = MetadataStore::new(persist, "cache", &Config::default());
        reloaded.load().await.unwrap();
        reloaded.load().await.unwrap();
        assert!(reloaded.get("a.mp3").await.is_some());
    }

    #[tokio::test]
    async fn do_not_retry_survives_save_load_round_trip() {
        let persist: Arc<dyn Persist> = Arc::new(MemoryPersist::default());
        let store = MetadataStore::new(persist.clone(), "cache", &Config::default());
        store.mark_do_not_retry("broken.mp3").await;
        store.flush().await;

        let reloaded = MetadataStore::new(persist, "cache", &Config::default());
        reloaded.load().await.unwrap();
        assert!(reloaded.is_do_not_retry("broken.mp3").await);
    }
}
