//! Ignore rules applied during directory walk (§4.F "Ignore rules").
//!
//! Persisted through the injected [`Persist`] like the metadata store,
//! song-key map and blob-store index, debounced the same way (`[ADDED]`
//! "Ignore-rule persistence" — SPEC_FULL.md), so rules survive restarts.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::debounce::Debouncer;
use crate::error::Result;
use crate::persist::Persist;

const PERSIST_KEY: &str = "ignoreRules";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreKind {
    PathRoot,
    PathKeyword,
    DirName,
}

#[derive(Default, Serialize, Deserialize)]
struct IgnoreSnapshot {
    path_roots: Vec<String>,
    path_keywords: Vec<String>,
    dir_names: Vec<String>,
}

#[derive(Default)]
struct State {
    path_roots: HashSet<String>,
    path_keywords: HashSet<String>,
    dir_names: HashSet<String>,
}

/// The three-kind ignore-rule set. Reads ([`IgnoreRules::is_ignored`])
/// are synchronous so the rule set can gate a `walkdir` `filter_entry`
/// closure directly; mutations go through a debounced save.
pub struct IgnoreRules {
    state: RwLock<State>,
    persist: Option<Arc<dyn Persist>>,
    debouncer: Option<Debouncer>,
}

impl IgnoreRules {
    /// A rule set with nothing to ignore and nowhere to persist to
    /// (used by components, like the file-list, that only need reads).
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            persist: None,
            debouncer: None,
        }
    }

    pub fn with_persistence(persist: Arc<dyn Persist>, config: &Config) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let save_persist = persist.clone();
            let debouncer = Debouncer::new(config.debounce_interval, move || {
                let weak = weak.clone();
                let persist = save_persist.clone();
                async move {
                    if let Some(rules) = weak.upgrade() {
                        if let Err(e) = rules.save_to(&persist).await {
                            warn!(error = %e, "failed to save ignore rules");
                        }
                    }
                }
            });
            Self {
                state: RwLock::new(State::default()),
                persist: Some(persist),
                debouncer: Some(debouncer),
            }
        })
    }

    pub async fn load(&self) -> Result<()> {
        let Some(persist) = &self.persist else {
            return Ok(());
        };
        let raw = persist.get_item(PERSIST_KEY).await?;
        let Some(raw) = raw else { return Ok(()) };
        let snapshot: IgnoreSnapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "ignore-rule blob corrupt, treating as empty");
                return Ok(());
            }
        };
        let mut state = self.state.write().unwrap();
        state.path_roots = snapshot.path_roots.into_iter().collect();
        state.path_keywords = snapshot.path_keywords.into_iter().collect();
        state.dir_names = snapshot.dir_names.into_iter().collect();
        Ok(())
    }

    async fn save_to(&self, persist: &Arc<dyn Persist>) -> Result<()> {
        let snapshot = {
            let state = self.state.read().unwrap();
            IgnoreSnapshot {
                path_roots: state.path_roots.iter().cloned().collect(),
                path_keywords: state.path_keywords.iter().cloned().collect(),
                dir_names: state.dir_names.iter().cloned().collect(),
            }
        };
        let body = serde_json::to_string(&snapshot)
            .map_err(|e| crate::error::Error::Corrupt(e.to_string()))?;
        persist.set_item(PERSIST_KEY, body).await
    }

    pub async fn add_item(&self, kind: IgnoreKind, value: &str) {
        {
            let mut state = self.state.write().unwrap();
            let value = value.to_lowercase();
            match kind {
                IgnoreKind::PathRoot => state.path_roots.insert(value),
                IgnoreKind::PathKeyword => state.path_keywords.insert(value),
                IgnoreKind::DirName => state.dir_names.insert(value),
            };
        }
        self.mark_dirty().await;
    }

    pub async fn remove_item(&self, kind: IgnoreKind, value: &str) {
        {
            let mut state = self.state.write().unwrap();
            let value = value.to_lowercase();
            match kind {
                IgnoreKind::PathRoot => state.path_roots.remove(&value),
                IgnoreKind::PathKeyword => state.path_keywords.remove(&value),
                IgnoreKind::DirName => state.dir_names.remove(&value),
            };
        }
        self.mark_dirty().await;
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

    /// A path is ignored if any root prefix matches (case-insensitive),
    /// any path component equals a dir-name entry, or the whole path
    /// contains a keyword substring.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let lowered = path.to_string_lossy().to_lowercase();
        let state = self.state.read().unwrap();

        if state
            .path_roots
            .iter()
            .any(|root| lowered.starts_with(root.as_str()))
        {
            return true;
        }
        if state.path_keywords.iter().any(|kw| lowered.contains(kw.as_str())) {
            return true;
        }
        path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|s| state.dir_names.contains(&s.to_lowercase()))
                .unwrap_or(false)
        })
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn path_root_rule_matches_case_insensitively() {
        let rules = IgnoreRules::new();
        rules.add_item(IgnoreKind::PathRoot, "/Music/Skip").await;
        assert!(rules.is_ignored(Path::new("/music/skip/song.mp3")));
        assert!(!rules.is_ignored(Path::new("/music/keep/song.mp3")));
    }

    #[tokio::test]
    async fn dir_name_rule_matches_any_component() {
        let rules = IgnoreRules::new();
        rules.add_item(IgnoreKind::DirName, "node_modules").await;
        assert!(rules.is_ignored(Path::new("/music/node_modules/x.mp3")));
    }

    #[tokio::test]
    async fn keyword_rule_matches_anywhere_in_path() {
        let rules = IgnoreRules::new();
        rules.add_item(IgnoreKind::PathKeyword, "backup").await;
        assert!(rules.is_ignored(Path::new("/music/2020-backup/x.mp3")));
    }

    #[tokio::test]
    async fn rules_round_trip_through_persistence() {
        use crate::persist::MemoryPersist;
        let persist: Arc<dyn Persist> = Arc::new(MemoryPersist::default());
        let rules = IgnoreRules::with_persistence(persist.clone(), &Config::default());
        rules.add_item(IgnoreKind::DirName, "trash").await;
        rules.flush().await;

        let reloaded = IgnoreRules::with_persistence(persist, &Config::default());
        reloaded.load().await.unwrap();
        assert!(reloaded.is_ignored(Path::new("/a/trash/b.mp3")));
    }
}
