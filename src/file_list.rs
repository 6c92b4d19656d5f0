//! Sorted file-list index (§4.B), one instance per AFI root, shared by
//! both audio and cover-art discovery (§4.E routes audio adds/removes to
//! the caller and image adds/removes to the AFI's own state).

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Result;
use crate::ignore::IgnoreRules;
use crate::persist::Persist;

const INDEX_KEY: &str = ".afi/fileIndex.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Audio,
    Image,
}

/// Classify a root-relative path; `None` means "not tracked" (wrong
/// suffix, or a hidden audio file — hidden files are allowed for
/// images but excluded for audio, §4.B).
fn classify(config: &Config, relative: &str) -> Option<FileKind> {
    let path = Path::new(relative);
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);

    if config.is_audio_suffix(ext) {
        if hidden {
            None
        } else {
            Some(FileKind::Audio)
        }
    } else if config.is_image_suffix(ext) {
        Some(FileKind::Image)
    } else {
        None
    }
}

pub struct FileList {
    root: std::path::PathBuf,
    persist: Arc<dyn Persist>,
    config: Config,
    entries: AsyncRwLock<Vec<String>>,
}

impl FileList {
    pub fn new(root: std::path::PathBuf, persist: Arc<dyn Persist>, config: Config) -> Self {
        Self {
            root,
            persist,
            config,
            entries: AsyncRwLock::new(Vec::new()),
        }
    }

    /// Load the persisted list; a missing blob yields an empty list.
    pub async fn load(&self) -> Result<()> {
        let raw = self.persist.get_item(INDEX_KEY).await?;
        let mut entries: Vec<String> = raw
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        entries.sort_by_key(|p| p.to_lowercase());
        *self.entries.write().await = entries;
        Ok(())
    }

    /// Walk `root`, diff the fresh listing against the previous one
    /// (case-insensitive two-pointer comparison), and deliver add/remove
    /// callbacks in sorted order. The new list is installed and
    /// persisted once the diff completes (§5: "install the new array
    /// reference only once").
    pub async fn rescan(
        &self,
        ignore: &IgnoreRules,
        mut on_add: impl FnMut(&str, FileKind),
        mut on_remove: impl FnMut(&str, FileKind),
    ) -> Result<()> {
        let mut fresh = self.walk(ignore);
        fresh.sort_by_key(|p| p.to_lowercase());

        let previous = self.entries.read().await.clone();
        diff_sorted(
            &previous,
            &fresh,
            |added| {
                if let Some(kind) = classify(&self.config, added) {
                    on_add(added, kind);
                }
            },
            |removed| {
                if let Some(kind) = classify(&self.config, removed) {
                    on_remove(removed, kind);
                }
            },
        );

        *self.entries.write().await = fresh.clone();
        self.persist.set_item(INDEX_KEY, fresh.join("\n")).await?;
        Ok(())
    }

    pub async fn for_each_file(&self, mut f: impl FnMut(&str, FileKind)) {
        for entry in self.entries.read().await.iter() {
            if let Some(kind) = classify(&self.config, entry) {
                f(entry, kind);
            }
        }
    }

    fn walk(&self, ignore: &IgnoreRules) -> Vec<String> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "root missing, yielding empty file list");
            return out;
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !ignore.is_ignored(e.path()));

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if classify(&self.config, &rel).is_some() {
                debug!(path = %rel, "tracked file observed during walk");
                out.push(rel);
            }
        }
        out
    }
}

/// Two-pointer diff over two case-insensitively-sorted lists.
fn diff_sorted(
    previous: &[String],
    fresh: &[String],
    mut on_add: impl FnMut(&str),
    mut on_remove: impl FnMut(&str),
) {
    let mut i = 0;
    let mut j = 0;
    while i < previous.len() && j < fresh.len() {
        let cmp = previous[i].to_lowercase().cmp(&fresh[j].to_lowercase());
        match cmp {
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                on_remove(&previous[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                on_add(&fresh[j]);
                j += 1;
            }
        }
    }
    for removed in &previous[i..] {
        on_remove(removed);
    }
    for added in &fresh[j..] {
        on_add(added);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;

    #[test]
    fn classify_excludes_hidden_audio_but_allows_hidden_images() {
        let config = Config::default();
        assert_eq!(classify(&config, "a/song.mp3"), Some(FileKind::Audio));
        assert_eq!(classify(&config, "a/.song.mp3"), None);
        assert_eq!(classify(&config, "a/.cover.jpg"), Some(FileKind::Image));
        assert_eq!(classify(&config, "a/readme.txt"), None);
    }

    #[test]
    fn diff_sorted_reports_adds_and_removes() {
        let previous = vec!["a.mp3".to_string(), "b.mp3".to_string(), "z.mp3".to_string()];
        let fresh = vec!["a.mp3".to_string(), "c.mp3".to_string(), "z.mp3".to_string()];
        let mut added = Vec::new();
        let mut removed = Vec::new();
        diff_sorted(&previous, &fresh, |a| added.push(a.to_string()), |r| removed.push(r.to_string()));
        assert_eq!(added, vec!["c.mp3".to_string()]);
        assert_eq!(removed, vec!["b.mp3".to_string()]);
    }

    #[tokio::test]
    async fn rescan_against_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"").unwrap();

        let persist = Arc::new(MemoryPersist::new(dir.path()));
        let list = FileList::new(dir.path().to_path_buf(), persist, Config::default());
        let ignore = IgnoreRules::new();

        let mut added = Vec::new();
        list.rescan(&ignore, |p, k| added.push((p.to_string(), k)), |_, _| {})
            .await
            .unwrap();
        added.sort();
        assert_eq!(
            added,
            vec![
                ("a.mp3".to_string(), FileKind::Audio),
                ("cover.jpg".to_string(), FileKind::Image),
            ]
        );

        std::fs::remove_file(dir.path().join("a.mp3")).unwrap();
        let mut removed = Vec::new();
        list.rescan(&ignore, |_, _| {}, |p, k| removed.push((p.to_string(), k)))
            .await
            .unwrap();
        assert_eq!(removed, vec![("a.mp3".to_string(), FileKind::Audio)]);
    }
}
