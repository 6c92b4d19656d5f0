//! Injected key-value persistence (§6 "Persistence backend").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::error::{Error, Result};

/// A key-value capability: `getItem`/`setItem` of opaque strings, plus a
/// `location()` used to derive per-AFI subdirectories (§6).
#[async_trait]
pub trait Persist: Send + Sync {
    async fn get_item(&self, name: &str) -> Result<Option<String>>;
    async fn set_item(&self, name: &str, value: String) -> Result<()>;
    fn location(&self) -> PathBuf;
}

/// Default `Persist`: one file per key under `location()`, matching the
/// teacher's directory-layout conventions (`config/paths.rs`) but with
/// an injected root instead of a process-global `Paths`.
pub struct FsPersist {
    root: PathBuf,
}

impl FsPersist {
    /// Use `root` as the backing directory. If it (or a later write
    /// target under it) turns out to be unwritable, callers fall back to
    /// a caller-supplied secondary `FsPersist` per §6.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(sanitize(name))
    }
}

/// Keys are arbitrary strings (e.g. `.afi/metadataCache`); map path
/// separators onto real subdirectories but keep everything else as-is.
fn sanitize(name: &str) -> PathBuf {
    name.split('/').collect()
}

#[async_trait]
impl Persist for FsPersist {
    async fn get_item(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read persisted item");
                Err(Error::Io(e))
            }
        }
    }

    async fn set_item(&self, name: &str, value: String) -> Result<()> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, value).await?;
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.root.clone()
    }
}

/// In-memory `Persist` for tests (§4.K `[ADDED]`).
#[derive(Clone)]
pub struct MemoryPersist {
    location: PathBuf,
    entries: Arc<AsyncMutex<HashMap<String, String>>>,
}

impl MemoryPersist {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            entries: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }
}

impl Default for MemoryPersist {
    fn default() -> Self {
        Self::new(Path::new("/memory"))
    }
}

#[async_trait]
impl Persist for MemoryPersist {
    async fn get_item(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(name).cloned())
    }

    async fn set_item(&self, name: &str, value: String) -> Result<()> {
        self.entries.lock().await.insert(name.to_string(), value);
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_persist_round_trips() {
        let p = MemoryPersist::default();
        assert_eq!(p.get_item("k").await.unwrap(), None);
        p.set_item("k", "v".into()).await.unwrap();
        assert_eq!(p.get_item("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn fs_persist_round_trips_through_a_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let p = FsPersist::new(dir.path());
        assert_eq!(p.get_item("missing").await.unwrap(), None);
        p.set_item(".afi/metadataCache", "{}".into()).await.unwrap();
        assert_eq!(
            p.get_item(".afi/metadataCache").await.unwrap(),
            Some("{}".to_string())
        );
        assert_eq!(p.location(), dir.path());
    }
}
