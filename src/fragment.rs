//! Audio-file-fragment (§4.E), one per indexed root. Composes the
//! sorted file-list index (§4.B), the two metadata stores (§4.C) and
//! the blob store (§4.D), and owns per-song cover-art resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::debounce::Debouncer;
use crate::error::{Error, Result};
use crate::file_list::{FileKind, FileList};
use crate::hashing::{fragment_hash as compute_fragment_hash, hash_str};
use crate::ignore::IgnoreRules;
use crate::keys::SongKey;
use crate::metadata::{FullMetadata, PartialMetadata};
use crate::metadata_store::MetadataStore;
use crate::persist::Persist;
use crate::registry::HashSlots;
use crate::tag_reader::TagReader;

const SONG_KEYS_KEY: &str = ".afi/songKeys";

fn relativize(root: &Path, absolute: &Path) -> Result<String> {
    let rel = absolute
        .strip_prefix(root)
        .map_err(|_| Error::InvalidPath(absolute.to_path_buf()))?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

fn dirname_of(rel: &str) -> String {
    match rel.rfind('/') {
        Some(idx) => rel[..idx].to_string(),
        None => String::new(),
    }
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

fn from_base36(s: &str) -> Option<u32> {
    u32::from_str_radix(s, 36).ok()
}

pub struct AudioFileFragment {
    root: PathBuf,
    fragment_hash: u32,
    config: Config,
    tag_reader: std::sync::Arc<dyn TagReader>,
    file_list: FileList,
    metadata_cache: std::sync::Arc<MetadataStore>,
    metadata_override: std::sync::Arc<MetadataStore>,
    blob_store: std::sync::Arc<BlobStore>,
    song_keys: AsyncRwLock<HashMap<String, u32>>,
    file_hash_slots: StdMutex<HashSlots<String>>,
    folder_images: AsyncRwLock<HashMap<String, PathBuf>>,
    last_scan_time: AsyncRwLock<Option<Instant>>,
    song_keys_debouncer: Option<Debouncer>,
}

impl AudioFileFragment {
    pub fn new(
        root: PathBuf,
        persist: std::sync::Arc<dyn Persist>,
        tag_reader: std::sync::Arc<dyn TagReader>,
        config: Config,
    ) -> std::sync::Arc<Self> {
        let fragment_hash = compute_fragment_hash(&root.to_string_lossy());
        let file_list = FileList::new(root.clone(), persist.clone(), config.clone());
        let metadata_cache = MetadataStore::new(persist.clone(), ".afi/metadataCache", &config);
        let metadata_override = MetadataStore::new(persist.clone(), ".afi/metadataOverride", &config);
        let blob_store = BlobStore::new(persist.clone(), "images", &config);

        std::sync::Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let save_persist = persist.clone();
            let debouncer = Debouncer::new(config.debounce_interval, move || {
                let weak = weak.clone();
                let persist = save_persist.clone();
                async move {
                    if let Some(afi) = weak.upgrade() {
                        if let Err(e) = afi.save_song_keys(&persist).await {
                            warn!(error = %e, "failed to save song keys");
                        }
                    }
                }
            });
            Self {
                root,
                fragment_hash,
                config,
                tag_reader,
                file_list,
                metadata_cache,
                metadata_override,
                blob_store,
                song_keys: AsyncRwLock::new(HashMap::new()),
                file_hash_slots: StdMutex::new(HashSlots::new()),
                folder_images: AsyncRwLock::new(HashMap::new()),
                last_scan_time: AsyncRwLock::new(None),
                song_keys_debouncer: Some(debouncer),
            }
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fragment_hash(&self) -> u32 {
        self.fragment_hash
    }

    pub async fn load(&self, persist: &std::sync::Arc<dyn Persist>) -> Result<()> {
        self.file_list.load().await?;
        self.metadata_cache.load().await?;
        self.metadata_override.load().await?;
        self.blob_store.load().await?;

        if let Some(raw) = persist.get_item(SONG_KEYS_KEY).await? {
            let mut map = HashMap::new();
            let mut slots = self.file_hash_slots.lock().unwrap();
            for line in raw.lines().filter(|l| !l.is_empty()) {
                let Some((hash_str, rel)) = line.split_once(',') else {
                    continue;
                };
                let Some(hash) = from_base36(hash_str) else {
                    continue;
                };
                slots.assign(hash, rel, rel.to_string());
                map.insert(rel.to_string(), hash);
            }
            drop(slots);
            *self.song_keys.write().await = map;
        }
        Ok(())
    }

    async fn save_song_keys(&self, persist: &std::sync::Arc<dyn Persist>) -> Result<()> {
        let body = {
            let map = self.song_keys.read().await;
            map.iter()
                .map(|(rel, hash)| format!("{},{}", to_base36(*hash), rel))
                .collect::<Vec<_>>()
                .join("\n")
        };
        persist.set_item(SONG_KEYS_KEY, body).await
    }

    async fn mark_song_keys_dirty(&self) {
        if let Some(d) = &self.song_keys_debouncer {
            d.mark_dirty().await;
        }
    }

    /// Deterministic song key per §3; persists the relative-path-to-hash
    /// mapping on first use.
    pub async fn make_song_key(&self, absolute_path: &Path) -> Result<SongKey> {
        let rel = relativize(&self.root, absolute_path)?;
        let existing = self.song_keys.read().await.get(&rel).copied();
        let file_hash = match existing {
            Some(h) => h,
            None => {
                let seed = hash_str(self.fragment_hash, &rel);
                let h = {
                    let mut slots = self.file_hash_slots.lock().unwrap();
                    slots.assign(seed, &rel, rel.clone())
                };
                self.song_keys.write().await.insert(rel.clone(), h);
                self.mark_song_keys_dirty().await;
                h
            }
        };
        Ok(SongKey::new(self.fragment_hash, file_hash))
    }

    /// §4.E's resolution pipeline, steps (1)-(8).
    pub async fn get_metadata_for_song(&self, absolute_path: &Path) -> Result<Option<FullMetadata>> {
        let rel = relativize(&self.root, absolute_path)?;

        if self.metadata_cache.is_do_not_retry(&rel).await {
            return Ok(None);
        }

        let over = self
            .metadata_override
            .get(&rel)
            .await
            .unwrap_or_else(|| PartialMetadata::new(rel.clone()));

        let mut path_only = self.tag_reader.synthesize(absolute_path, None);
        path_only.original_path = rel.clone();
        let merged = path_only.merged_with_override(&over);
        let dirname = dirname_of(&rel);

        if merged.is_complete() {
            self.metadata_cache.set(&rel, merged.clone()).await;
            return Ok(merged.into_full(dirname));
        }

        let Some(tag_data) = self.tag_reader.parse_file(absolute_path).await else {
            self.metadata_cache.mark_do_not_retry(&rel).await;
            return Ok(None);
        };

        let mut full_synth = self.tag_reader.synthesize(absolute_path, Some(tag_data));
        full_synth.original_path = rel.clone();
        let merged = full_synth.merged_with_override(&over);

        match merged.clone().into_full(dirname) {
            Some(full) => {
                self.metadata_cache.set(&rel, merged).await;
                Ok(Some(full))
            }
            None => {
                self.metadata_cache.mark_do_not_retry(&rel).await;
                Ok(None)
            }
        }
    }

    pub async fn update_metadata(&self, absolute_path: &Path, mut partial: PartialMetadata) -> Result<bool> {
        let rel = relativize(&self.root, absolute_path)?;
        partial.original_path = rel.clone();
        Ok(self.metadata_override.set(&rel, partial).await)
    }

    /// Probe order: blob store -> (if `prefer_internal`) embedded -> folder image -> embedded.
    pub async fn get_image_for_song(&self, absolute_path: &Path, prefer_internal: bool) -> Result<Option<Vec<u8>>> {
        let rel = relativize(&self.root, absolute_path)?;
        let blob_key = format!("song:{rel}");
        if let Some(bytes) = self.blob_store.get(&blob_key).await? {
            return Ok(Some(bytes));
        }
        if prefer_internal {
            if let Some(bytes) = embedded_picture(absolute_path).await {
                return Ok(Some(bytes));
            }
        }
        if let Some(image_path) = self.folder_images.read().await.get(&rel).cloned() {
            if let Ok(bytes) = tokio::fs::read(&image_path).await {
                return Ok(Some(bytes));
            }
        }
        Ok(embedded_picture(absolute_path).await)
    }

    pub async fn set_image_for_song(&self, absolute_path: &Path, bytes: Vec<u8>) -> Result<()> {
        let rel = relativize(&self.root, absolute_path)?;
        self.blob_store.set(&format!("song:{rel}"), bytes).await
    }

    /// Delegates to the file-list index; audio adds/removes are routed
    /// to the caller, image adds/removes only trigger a folder-image
    /// recompute.
    pub async fn rescan_files(
        &self,
        ignore: &IgnoreRules,
        mut on_add_song: impl FnMut(&Path),
        mut on_remove_song: impl FnMut(&Path),
    ) -> Result<()> {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        self.file_list
            .rescan(
                ignore,
                |p, kind| {
                    if kind == FileKind::Audio {
                        added.push(p.to_string());
                    }
                },
                |p, kind| {
                    if kind == FileKind::Audio {
                        removed.push(p.to_string());
                    }
                },
            )
            .await?;

        for p in &added {
            on_add_song(&self.root.join(p));
        }
        for p in &removed {
            on_remove_song(&self.root.join(p));
        }

        self.recompute_folder_images().await;
        *self.last_scan_time.write().await = Some(Instant::now());
        info!(root = %self.root.display(), added = added.len(), removed = removed.len(), "rescan complete");
        Ok(())
    }

    /// Group images by containing directory; for every directory that
    /// also holds audio files, pick the largest-by-size image and
    /// record it as the folder image for each audio file there.
    async fn recompute_folder_images(&self) {
        let mut images_by_dir: HashMap<String, Vec<String>> = HashMap::new();
        let mut audio_by_dir: HashMap<String, Vec<String>> = HashMap::new();
        self.file_list
            .for_each_file(|rel, kind| {
                let dir = dirname_of(rel);
                match kind {
                    FileKind::Image => images_by_dir.entry(dir).or_default().push(rel.to_string()),
                    FileKind::Audio => audio_by_dir.entry(dir).or_default().push(rel.to_string()),
                }
            })
            .await;

        let mut new_map = HashMap::new();
        for (dir, audio_files) in &audio_by_dir {
            let Some(images) = images_by_dir.get(dir) else {
                continue;
            };
            let mut best: Option<(String, u64)> = None;
            for img in images {
                let full = self.root.join(img);
                if let Ok(meta) = tokio::fs::metadata(&full).await {
                    let size = meta.len();
                    if best.as_ref().map(|(_, s)| size > *s).unwrap_or(true) {
                        best = Some((img.clone(), size));
                    }
                }
            }
            if let Some((img, _)) = best {
                let full = self.root.join(&img);
                for audio in audio_files {
                    new_map.insert(audio.clone(), full.clone());
                }
            }
        }
        *self.folder_images.write().await = new_map;
    }

    /// Flushes every debounced save owned by this fragment. Deregistering
    /// from the AFI registry is the database's responsibility, since the
    /// registry is explicit state it owns (§9 redesign note).
    pub async fn destroy(&self) {
        self.metadata_cache.destroy().await;
        self.metadata_override.destroy().await;
        self.blob_store.destroy().await;
        if let Some(d) = &self.song_keys_debouncer {
            d.trigger().await;
        }
    }
}

async fn embedded_picture(path: &Path) -> Option<Vec<u8>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use lofty::{Probe, TaggedFileExt};
        let tagged_file = Probe::open(&path).ok()?.read().ok()?;
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag())?;
        tag.pictures().first().map(|p| p.data().to_vec())
    })
    .await
    .ok()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;
    use crate::tag_reader::StubTagReader;

    fn afi(root: PathBuf) -> std::sync::Arc<AudioFileFragment> {
        let persist: std::sync::Arc<dyn Persist> = std::sync::Arc::new(MemoryPersist::new(root.clone()));
        let tag_reader: std::sync::Arc<dyn TagReader> = std::sync::Arc::new(StubTagReader::new());
        AudioFileFragment::new(root, persist, tag_reader, Config::default())
    }

    #[tokio::test]
    async fn make_song_key_is_stable_across_calls() {
        let afi = afi(PathBuf::from("/music"));
        let k1 = afi.make_song_key(Path::new("/music/a.mp3")).await.unwrap();
        let k2 = afi.make_song_key(Path::new("/music/a.mp3")).await.unwrap();
        assert_eq!(k1, k2);
    }

    #[tokio::test]
    async fn make_song_key_rejects_paths_outside_the_root() {
        let afi = afi(PathBuf::from("/music"));
        let err = afi.make_song_key(Path::new("/elsewhere/a.mp3")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[tokio::test]
    async fn get_metadata_for_song_resolves_via_the_filename_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let afi = afi(dir.path().to_path_buf());
        let sub = dir.path().join("The Artist - 2000 - The Album");
        std::fs::create_dir_all(&sub).unwrap();
        let file = sub.join("01 - A Song.mp3");
        std::fs::write(&file, b"").unwrap();

        let full = afi.get_metadata_for_song(&file).await.unwrap().unwrap();
        assert_eq!(full.title, "A Song");
        assert_eq!(full.album_title, "The Album");
        assert_eq!(full.year, 2000);
        assert_eq!(full.track, 1);
        assert_eq!(full.primary_artists, vec!["The Artist".to_string()]);
    }

    #[tokio::test]
    async fn repeated_failure_is_remembered_as_do_not_retry() {
        let dir = tempfile::tempdir().unwrap();
        let afi = afi(dir.path().to_path_buf());
        let file = dir.path().join("untagged.mp3");
        std::fs::write(&file, b"").unwrap();

        assert!(afi.get_metadata_for_song(&file).await.unwrap().is_none());
        assert!(afi.metadata_cache.is_do_not_retry("untagged.mp3").await);
        // A second call must not attempt the tag parser again — the
        // stub reader has nothing scripted, so the only way this stays
        // `None` without panicking is the do-not-retry short circuit.
        assert!(afi.get_metadata_for_song(&file).await.unwrap().is_none());
    }
}
