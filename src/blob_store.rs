//! Content-addressed blob store (§4.D), one per AFI root, used for
//! artwork that many keys (song/album/artist) may share.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::warn;

use crate::config::Config;
use crate::debounce::Debouncer;
use crate::error::{Error, Result};
use crate::hashing::hash_bytes;
use crate::persist::Persist;

struct State {
    seq: u64,
    key_to_payload: HashMap<String, String>,
    payload_refs: HashMap<String, HashSet<String>>,
    /// Content hash -> payload filename, for in-session dedup of
    /// identical bytes set under different keys. Not persisted: the
    /// on-disk index format (§6) is `(key, filename)` pairs only, so
    /// after a fresh `load()` this starts empty until re-populated by
    /// further `set` calls this session.
    content_index: HashMap<u32, String>,
}

/// Maps caller-supplied keys to shared binary payload files, reference
/// counted so a payload is only deleted once its last key is gone.
pub struct BlobStore {
    persist: Arc<dyn Persist>,
    /// Subdirectory under the persist root, e.g. `images`.
    dir: String,
    state: AsyncRwLock<State>,
    debouncer: Option<Debouncer>,
}

impl BlobStore {
    pub fn new(persist: Arc<dyn Persist>, dir: impl Into<String>, config: &Config) -> Arc<Self> {
        let dir = dir.into();
        Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let save_persist = persist.clone();
            let debouncer = Debouncer::new(config.debounce_interval, move || {
                let weak = weak.clone();
                let persist = save_persist.clone();
                async move {
                    if let Some(store) = weak.upgrade() {
                        if let Err(e) = store.save_index(&persist).await {
                            warn!(error = %e, "failed to save blob store index");
                        }
                    }
                }
            });
            Self {
                persist,
                dir,
                state: AsyncRwLock::new(State {
                    seq: 0,
                    key_to_payload: HashMap::new(),
                    payload_refs: HashMap::new(),
                    content_index: HashMap::new(),
                }),
                debouncer: Some(debouncer),
            }
        })
    }

    fn index_key(&self) -> String {
        format!("{}/index.txt", self.dir)
    }

    fn payload_key(&self, filename: &str) -> String {
        format!("{}/{}", self.dir, filename)
    }

    /// Parse the index file: first line is the last-used sequence
    /// number, followed by alternating `(key, filename)` lines.
    pub async fn load(&self) -> Result<()> {
        let Some(raw) = self.persist.get_item(&self.index_key()).await? else {
            return Ok(());
        };
        let mut lines = raw.lines();
        let Some(seq_line) = lines.next() else {
            return Ok(());
        };
        let seq: u64 = match seq_line.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                warn!("blob store index has a corrupt sequence line, treating as empty");
                return Ok(());
            }
        };

        let mut key_to_payload = HashMap::new();
        let mut payload_refs: HashMap<String, HashSet<String>> = HashMap::new();
        let rest: Vec<&str> = lines.collect();
        for pair in rest.chunks(2) {
            let [key, filename] = pair else { continue };
            key_to_payload.insert(key.to_string(), filename.to_string());
            payload_refs
                .entry(filename.to_string())
                .or_default()
                .insert(key.to_string());
        }

        let mut state = self.state.write().await;
        state.seq = seq;
        state.key_to_payload = key_to_payload;
        state.payload_refs = payload_refs;
        Ok(())
    }

    async fn save_index(&self, persist: &Arc<dyn Persist>) -> Result<()> {
        let body = {
            let state = self.state.read().await;
            let mut lines = vec![state.seq.to_string()];
            for (key, filename) in &state.key_to_payload {
                lines.push(key.clone());
                lines.push(filename.clone());
            }
            lines.join("\n")
        };
        persist.set_item(&self.index_key(), body).await
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

    /// Associate `key` with `bytes`. Identical bytes already stored
    /// under another key are reused (content-addressed) rather than
    /// duplicated on disk.
    pub async fn set(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let hash = hash_bytes(0, &bytes);
        let filename = {
            let mut state = self.state.write().await;
            if let Some(existing) = state.content_index.get(&hash) {
                existing.clone()
            } else {
                state.seq += 1;
                let filename = format!("BLOB-{}", state.seq);
                state.content_index.insert(hash, filename.clone());
                filename
            }
        };

        self.persist
            .set_item(&self.payload_key(&filename), STANDARD.encode(&bytes))
            .await?;

        {
            let mut state = self.state.write().await;
            if let Some(old) = state.key_to_payload.insert(key.to_string(), filename.clone()) {
                if let Some(refs) = state.payload_refs.get_mut(&old) {
                    refs.remove(key);
                }
            }
            state
                .payload_refs
                .entry(filename)
                .or_default()
                .insert(key.to_string());
        }
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let filename = {
            let state = self.state.read().await;
            state.key_to_payload.get(key).cloned()
        };
        let Some(filename) = filename else {
            return Ok(None);
        };
        let raw = self.persist.get_item(&self.payload_key(&filename)).await?;
        match raw {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| Error::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    /// Remove `key`'s association; the payload file itself is only
    /// deleted once no key references it any more.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let filename = {
            let mut state = self.state.write().await;
            state.key_to_payload.remove(key)
        };
        let Some(filename) = filename else {
            return Ok(());
        };

        let should_delete_payload = {
            let mut state = self.state.write().await;
            if let Some(refs) = state.payload_refs.get_mut(&filename) {
                refs.remove(key);
                refs.is_empty()
            } else {
                true
            }
        };

        if should_delete_payload {
            let mut state = self.state.write().await;
            state.payload_refs.remove(&filename);
            state.content_index.retain(|_, v| v != &filename);
            drop(state);
            // Best-effort: the persist trait has no delete, so we
            // overwrite with an empty string. A real deployment's
            // Persist may additionally expose compaction out-of-band.
            self.persist.set_item(&self.payload_key(&filename), String::new()).await?;
        }
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let filenames: Vec<String> = {
            let state = self.state.read().await;
            state.payload_refs.keys().cloned().collect()
        };
        for filename in filenames {
            self.persist.set_item(&self.payload_key(&filename), String::new()).await?;
        }
        let mut state = self.state.write().await;
        state.key_to_payload.clear();
        state.payload_refs.clear();
        state.content_index.clear();
        drop(state);
        self.mark_dirty().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;

    #[tokio::test]
    async fn set_get_round_trips() {
        let store = BlobStore::new(Arc::new(MemoryPersist::default()), "images", &Config::default());
        store.set("song:S1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("song:S1").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn identical_bytes_are_deduplicated_across_keys() {
        let store = BlobStore::new(Arc::new(MemoryPersist::default()), "images", &Config::default());
        store.set("song:S1", vec![9, 9, 9]).await.unwrap();
        store.set("song:S2", vec![9, 9, 9]).await.unwrap();
        let filename_for = |k: &str, st: &State| st.key_to_payload.get(k).cloned();
        let state = store.state.read().await;
        assert_eq!(filename_for("song:S1", &state), filename_for("song:S2", &state));
    }

    #[tokio::test]
    async fn delete_only_removes_payload_once_last_key_is_gone() {
        let store = BlobStore::new(Arc::new(MemoryPersist::default()), "images", &Config::default());
        store.set("song:S1", vec![7]).await.unwrap();
        store.set("song:S2", vec![7]).await.unwrap();
        store.delete("song:S1").await.unwrap();
        assert_eq!(store.get("song:S2").await.unwrap(), Some(vec![7]));
        store.delete("song:S2").await.unwrap();
        assert_eq!(store.get("song:S2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn index_round_trips_through_persistence() {
        let persist: Arc<dyn Persist> = Arc::new(MemoryPersist::default());
        let store = BlobStore::new(persist.clone(), "images", &Config::default());
        store.set("song:S1", vec![1, 2, 3]).await.unwrap();
        store.flush().await;

        let reloaded = BlobStore::new(persist, "images", &Config::default());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get("song:S1").await.unwrap(), Some(vec![1, 2, 3]));
    }
}
