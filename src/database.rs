//! The aggregate database (§4.F / §6): merges every registered root's
//! AFI into a Song/Album/Artist graph, owns the lazily-built search
//! index, and persists the whole graph through the same injected
//! [`Persist`] used by its components.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Notify, RwLock as AsyncRwLock};
use tracing::warn;

use crate::canonical;
use crate::config::{Config, SameTitleDifferentArtists};
use crate::debounce::Debouncer;
use crate::error::{Error, Result};
use crate::fragment::AudioFileFragment;
use crate::hashing::fragment_hash;
use crate::ignore::{IgnoreKind, IgnoreRules};
use crate::keys::{AlbumKey, ArtistKey, SongKey};
use crate::metadata::{FullMetadata, PartialMetadata, VaType};
use crate::models::{Album, Artist, Song};
use crate::normalize::norm;
use crate::persist::Persist;
use crate::registry::AfiRegistry;
use crate::search::{SearchIndex, SearchResults};
use crate::tag_reader::TagReader;

/// Outcome of a `refresh()` call (`[ADDED]` supplemented feature,
/// SPEC_FULL.md): refreshes are single-inflight, with callers that
/// arrive mid-refresh waiting up to `Config::refresh_grace_period`
/// rather than starting a redundant scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call drove the scan to completion.
    Completed { added: usize, removed: usize },
    /// An in-flight refresh finished before the grace period elapsed.
    Coalesced,
    /// An in-flight refresh was still running when the grace period
    /// elapsed; the caller should retry later.
    TimedOut,
}

/// A point-in-time snapshot of the whole graph (`[ADDED]` supplemented
/// feature: `get_flat_view()`).
#[derive(Debug, Clone, Default)]
pub struct FlatView {
    pub songs: Vec<Song>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
}

#[derive(Default, Serialize, Deserialize)]
struct DatabaseSnapshot {
    songs: HashMap<SongKey, Song>,
    albums: HashMap<AlbumKey, Album>,
    artists: HashMap<ArtistKey, Artist>,
    album_title_index: HashMap<String, HashSet<AlbumKey>>,
    artist_name_index: HashMap<String, ArtistKey>,
    /// Root paths in registration order, so replaying them through
    /// `AfiRegistry::register` on load reproduces the same hash
    /// assignments (including any chained-rehash collisions) without
    /// having to persist the hashes themselves.
    locations: Vec<String>,
}

struct RefreshGate {
    running: bool,
    notify: Arc<Notify>,
}

/// Result of matching a song against a candidate album (§4.F). `Plain`
/// defers the primary/secondary split to a generic post-match read of
/// the album's own `primary_artists`; `Demoted` carries the artist set
/// the incoming song (and, when `rewrite_existing` is set, every song
/// already attached to the album) must be split against.
enum AlbumMatch {
    Plain,
    Demoted {
        established: HashSet<ArtistKey>,
        rewrite_existing: bool,
    },
}

/// Partition `keys` into (primary, secondary) by membership in `established`.
fn split_by_membership(keys: Vec<ArtistKey>, established: &HashSet<ArtistKey>) -> (Vec<ArtistKey>, Vec<ArtistKey>) {
    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    for k in keys {
        if established.contains(&k) {
            primary.push(k);
        } else {
            secondary.push(k);
        }
    }
    (primary, secondary)
}

pub struct Database {
    persist: Arc<dyn Persist>,
    tag_reader: Arc<dyn TagReader>,
    config: Config,
    afi_registry: AsyncRwLock<AfiRegistry>,
    fragments: AsyncRwLock<HashMap<u32, Arc<AudioFileFragment>>>,
    ignore_rules: Arc<IgnoreRules>,
    songs: AsyncRwLock<HashMap<SongKey, Song>>,
    albums: AsyncRwLock<HashMap<AlbumKey, Album>>,
    artists: AsyncRwLock<HashMap<ArtistKey, Artist>>,
    album_title_index: AsyncRwLock<HashMap<String, HashSet<AlbumKey>>>,
    artist_name_index: AsyncRwLock<HashMap<String, ArtistKey>>,
    search_index: AsyncMutex<SearchIndex>,
    debouncer: Option<Debouncer>,
    refresh_gate: AsyncMutex<RefreshGate>,
}

impl Database {
    pub fn new(persist: Arc<dyn Persist>, tag_reader: Arc<dyn TagReader>, config: Config) -> Arc<Self> {
        let ignore_rules = IgnoreRules::with_persistence(persist.clone(), &config);

        Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let debouncer = Debouncer::new(config.debounce_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(db) = weak.upgrade() {
                        if let Err(e) = db.save_now().await {
                            warn!(error = %e, "failed to save database");
                        }
                    }
                }
            });
            Self {
                persist,
                tag_reader,
                config,
                afi_registry: AsyncRwLock::new(AfiRegistry::new()),
                fragments: AsyncRwLock::new(HashMap::new()),
                ignore_rules,
                songs: AsyncRwLock::new(HashMap::new()),
                albums: AsyncRwLock::new(HashMap::new()),
                artists: AsyncRwLock::new(HashMap::new()),
                album_title_index: AsyncRwLock::new(HashMap::new()),
                artist_name_index: AsyncRwLock::new(HashMap::new()),
                search_index: AsyncMutex::new(SearchIndex::new()),
                debouncer: Some(debouncer),
                refresh_gate: AsyncMutex::new(RefreshGate {
                    running: false,
                    notify: Arc::new(Notify::new()),
                }),
            }
        })
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

    pub async fn shutdown(&self) {
        self.flush().await;
        self.ignore_rules.flush().await;
        for afi in self.fragments.read().await.values() {
            afi.destroy().await;
        }
    }

    // -- Locations -----------------------------------------------------

    pub async fn add_file_location(&self, root: PathBuf) -> Result<u32> {
        let root_str = root.to_string_lossy().to_string();
        let seed = fragment_hash(&root_str);
        let hash = self.afi_registry.write().await.register(seed, &root_str);

        let needs_load = !self.fragments.read().await.contains_key(&hash);
        if needs_load {
            let afi = AudioFileFragment::new(root, self.persist.clone(), self.tag_reader.clone(), self.config.clone());
            afi.load(&self.persist).await?;
            self.fragments.write().await.insert(hash, afi);
        }
        self.mark_dirty().await;
        Ok(hash)
    }

    pub async fn remove_file_location(&self, root: &Path) -> Result<()> {
        let root_str = root.to_string_lossy().to_string();
        let Some(hash) = self.afi_registry.read().await.hash_for_exact_root(&root_str) else {
            return Ok(());
        };

        let afi = self.fragments.write().await.remove(&hash);
        if let Some(afi) = afi {
            afi.destroy().await;
            let keys: Vec<SongKey> = self
                .songs
                .read()
                .await
                .keys()
                .filter(|k| k.split().map(|(afi_enc, _)| afi_enc) == Some(crate::hashing::encode(hash).as_str()))
                .cloned()
                .collect();
            for key in keys {
                self.del_song_by_key(&key).await;
            }
        }
        self.afi_registry.write().await.deregister(hash);
        self.mark_dirty().await;
        Ok(())
    }

    pub async fn get_locations(&self) -> Vec<PathBuf> {
        self.afi_registry.read().await.roots().map(PathBuf::from).collect()
    }

    // -- Refresh ---------------------------------------------------------

    /// Single-inflight: a caller arriving while a refresh is already
    /// running waits (bounded by `Config::refresh_grace_period`) for it
    /// to finish rather than starting a second scan.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let notify = {
            let mut gate = self.refresh_gate.lock().await;
            if gate.running {
                Some(gate.notify.clone())
            } else {
                gate.running = true;
                None
            }
        };

        let Some(notify) = notify else {
            let result = self.run_refresh().await;
            let mut gate = self.refresh_gate.lock().await;
            gate.running = false;
            gate.notify.notify_waiters();
            gate.notify = Arc::new(Notify::new());
            drop(gate);
            return result.map(|(added, removed)| RefreshOutcome::Completed { added, removed });
        };

        match tokio::time::timeout(self.config.refresh_grace_period, notify.notified()).await {
            Ok(_) => Ok(RefreshOutcome::Coalesced),
            Err(_) => Ok(RefreshOutcome::TimedOut),
        }
    }

    async fn run_refresh(&self) -> Result<(usize, usize)> {
        let fragments: Vec<Arc<AudioFileFragment>> = self.fragments.read().await.values().cloned().collect();

        let mut total_added = 0usize;
        let mut total_removed = 0usize;

        for afi in fragments {
            let mut added_paths = Vec::new();
            let mut removed_paths = Vec::new();
            afi.rescan_files(
                &self.ignore_rules,
                |p| added_paths.push(p.to_path_buf()),
                |p| removed_paths.push(p.to_path_buf()),
            )
            .await?;

            for path in &removed_paths {
                if let Ok(key) = afi.make_song_key(path).await {
                    self.del_song_by_key(&key).await;
                    total_removed += 1;
                }
            }
            for path in &added_paths {
                if let Some(full) = afi.get_metadata_for_song(path).await? {
                    let key = afi.make_song_key(path).await?;
                    self.add_or_update_song(key, full).await;
                    total_added += 1;
                }
            }
        }

        self.mark_dirty().await;
        Ok((total_added, total_removed))
    }

    // -- addOrUpdateSong / delSongByKey ----------------------------------

    async fn resolve_artist(&self, name: &str) -> ArtistKey {
        let key = ArtistKey::for_name(name);
        self.artists
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| Artist::new(key.clone(), name.to_string()));
        self.artist_name_index.write().await.insert(norm(name), key.clone());
        key
    }

    /// §4.F's album-identity resolution: year rejection, VA/OST match,
    /// exact-artist-set match, then (for any same-directory candidate,
    /// regardless of whether the artist sets overlap) the configurable
    /// collapse-to-VA/demote fallback.
    async fn get_or_new_album(&self, full: &FullMetadata, primary_keys: &[ArtistKey]) -> (AlbumKey, AlbumMatch) {
        let norm_title = norm(&full.album_title);
        let candidates: Vec<AlbumKey> = self
            .album_title_index
            .read()
            .await
            .get(&norm_title)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let incoming_vatype = full.vatype;

        for candidate_key in &candidates {
            let mut albums = self.albums.write().await;
            let Some(album) = albums.get_mut(candidate_key) else {
                continue;
            };
            if album.year != full.year {
                continue;
            }
            if album.vatype != VaType::None || incoming_vatype != VaType::None {
                return (candidate_key.clone(), AlbumMatch::Plain);
            }

            let existing: HashSet<ArtistKey> = album.primary_artists.iter().cloned().collect();
            let incoming: HashSet<ArtistKey> = primary_keys.iter().cloned().collect();

            if !existing.is_empty() && existing == incoming {
                return (candidate_key.clone(), AlbumMatch::Plain);
            }

            if !album.directories.contains(&full.dirname) {
                continue;
            }

            match self.config.same_title_different_artists {
                SameTitleDifferentArtists::KeepIndependent => continue,
                SameTitleDifferentArtists::CollapseToVa => {
                    let common: HashSet<ArtistKey> = existing.intersection(&incoming).cloned().collect();
                    if common.is_empty() {
                        album.vatype = VaType::Va;
                        album.primary_artists.clear();
                        return (
                            candidate_key.clone(),
                            AlbumMatch::Demoted {
                                established: existing,
                                rewrite_existing: false,
                            },
                        );
                    } else {
                        album.primary_artists = common.iter().cloned().collect();
                        return (
                            candidate_key.clone(),
                            AlbumMatch::Demoted {
                                established: common,
                                rewrite_existing: true,
                            },
                        );
                    }
                }
            }
        }

        let key = if incoming_vatype != VaType::None {
            AlbumKey::for_vatype(&full.album_title, incoming_vatype.as_str(), full.year)
        } else {
            let mut names: Vec<&str> = primary_keys.iter().map(|k| k.as_str()).collect();
            names.sort_unstable();
            AlbumKey::for_artists(&full.album_title, &names.join(","), full.year)
        };

        self.albums.write().await.entry(key.clone()).or_insert_with(|| {
            let mut album = Album::new(key.clone(), full.album_title.clone(), full.year, incoming_vatype);
            if incoming_vatype == VaType::None {
                album.primary_artists = primary_keys.to_vec();
            }
            album
        });

        self.album_title_index
            .write()
            .await
            .entry(norm_title)
            .or_default()
            .insert(key.clone());

        (key, AlbumMatch::Plain)
    }

    /// After narrowing an album's primary artists to the set shared with
    /// a same-directory candidate (§4.F's demote branch), re-split every
    /// song already attached to the album: artists outside the new common
    /// set move from primary to secondary.
    async fn rewrite_existing_album_songs(&self, album_key: &AlbumKey, common: &HashSet<ArtistKey>) {
        let song_keys: Vec<SongKey> = {
            let albums = self.albums.read().await;
            match albums.get(album_key) {
                Some(album) => album.songs.clone(),
                None => return,
            }
        };
        let mut songs = self.songs.write().await;
        for sk in song_keys {
            if let Some(song) = songs.get_mut(&sk) {
                let (primary, demoted) = split_by_membership(std::mem::take(&mut song.primary_artists), common);
                song.primary_artists = primary;
                for k in demoted {
                    if !song.secondary_artists.contains(&k) {
                        song.secondary_artists.push(k);
                    }
                }
            }
        }
    }

    async fn add_or_update_song(&self, key: SongKey, full: FullMetadata) {
        let mut primary_keys = Vec::with_capacity(full.primary_artists.len());
        for name in &full.primary_artists {
            primary_keys.push(self.resolve_artist(name).await);
        }

        let (album_key, album_match) = self.get_or_new_album(&full, &primary_keys).await;

        if let AlbumMatch::Demoted {
            established,
            rewrite_existing: true,
        } = &album_match
        {
            self.rewrite_existing_album_songs(&album_key, established).await;
        }

        // Demotion: on a non-VA album, artists not part of the album's
        // established primary set are secondary for this song (e.g. a
        // guest feature on an otherwise single-artist album).
        let (song_primary, song_secondary) = match album_match {
            AlbumMatch::Demoted { established, .. } => split_by_membership(primary_keys, &established),
            AlbumMatch::Plain => {
                let albums = self.albums.read().await;
                match albums.get(&album_key) {
                    Some(album) if album.vatype == VaType::None && !album.primary_artists.is_empty() => {
                        let established: HashSet<ArtistKey> = album.primary_artists.iter().cloned().collect();
                        split_by_membership(primary_keys, &established)
                    }
                    _ => (primary_keys, Vec::new()),
                }
            }
        };

        let song = Song {
            key: key.clone(),
            relative_path: full.relative_path.clone(),
            title: full.title.clone(),
            track: full.track,
            album: album_key.clone(),
            primary_artists: song_primary.clone(),
            secondary_artists: song_secondary.clone(),
            variations: full.variations.clone(),
        };
        self.songs.write().await.insert(key.clone(), song);

        {
            let mut albums = self.albums.write().await;
            if let Some(album) = albums.get_mut(&album_key) {
                if !album.songs.contains(&key) {
                    album.songs.push(key.clone());
                }
                if album.primary_artists.is_empty() && album.vatype == VaType::None {
                    album.primary_artists = song_primary.clone();
                }
                album.set_disk_name(full.disk_num(), full.disk_name.clone());
                album.directories.insert(full.dirname.clone());
            }
        }

        {
            let mut artists = self.artists.write().await;
            for k in song_primary.iter().chain(song_secondary.iter()) {
                if let Some(artist) = artists.get_mut(k) {
                    if !artist.songs.contains(&key) {
                        artist.songs.push(key.clone());
                    }
                }
            }
            for k in &song_primary {
                if let Some(artist) = artists.get_mut(k) {
                    if !artist.albums.contains(&album_key) {
                        artist.albums.push(album_key.clone());
                    }
                }
            }
        }

        self.search_index.lock().await.invalidate();
        self.mark_dirty().await;
    }

    async fn del_song_by_key(&self, key: &SongKey) {
        let song = self.songs.write().await.remove(key);
        let Some(song) = song else {
            return;
        };

        let mut removed_album: Option<Album> = None;
        {
            let remaining_songs = self.songs.read().await;
            let mut albums = self.albums.write().await;
            if let Some(album) = albums.get_mut(&song.album) {
                album.songs.retain(|k| k != key);
                if album.songs.is_empty() {
                    removed_album = albums.remove(&song.album);
                } else if album.vatype == VaType::None {
                    let still_referenced: HashSet<&ArtistKey> = album
                        .songs
                        .iter()
                        .filter_map(|sk| remaining_songs.get(sk))
                        .flat_map(|s| s.primary_artists.iter())
                        .collect();
                    album.primary_artists.retain(|a| still_referenced.contains(a));
                }
            }
        }

        if let Some(album) = &removed_album {
            let mut index = self.album_title_index.write().await;
            let norm_title = norm(&album.title);
            if let Some(set) = index.get_mut(&norm_title) {
                set.remove(&album.key);
                if set.is_empty() {
                    index.remove(&norm_title);
                }
            }
        }

        let empty_artists: Vec<ArtistKey> = {
            let mut artists = self.artists.write().await;
            for artist_key in song.primary_artists.iter().chain(song.secondary_artists.iter()) {
                if let Some(artist) = artists.get_mut(artist_key) {
                    artist.songs.retain(|k| k != key);
                    if let Some(album) = &removed_album {
                        artist.albums.retain(|a| a != &album.key);
                    }
                }
            }
            let empty: Vec<ArtistKey> = artists
                .iter()
                .filter(|(_, a)| a.songs.is_empty() && a.albums.is_empty())
                .map(|(k, _)| k.clone())
                .collect();
            for k in &empty {
                artists.remove(k);
            }
            empty
        };
        if !empty_artists.is_empty() {
            self.artist_name_index
                .write()
                .await
                .retain(|_, v| !empty_artists.contains(v));
        }

        self.search_index.lock().await.invalidate();
        self.mark_dirty().await;
    }

    // -- Lookups -----------------------------------------------------

    pub async fn get_song(&self, key: &SongKey) -> Option<Song> {
        self.songs.read().await.get(key).cloned()
    }

    pub async fn get_album(&self, key: &AlbumKey) -> Option<Album> {
        self.albums.read().await.get(key).cloned()
    }

    pub async fn get_artist(&self, key: &ArtistKey) -> Option<Artist> {
        self.artists.read().await.get(key).cloned()
    }

    pub async fn get_flat_view(&self) -> FlatView {
        FlatView {
            songs: self.songs.read().await.values().cloned().collect(),
            albums: self.albums.read().await.values().cloned().collect(),
            artists: self.artists.read().await.values().cloned().collect(),
        }
    }

    pub async fn search(&self, substring: bool, term_string: &str) -> SearchResults {
        let song_items: Vec<(SongKey, String)> = self
            .songs
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.title.clone()))
            .collect();
        let album_items: Vec<(AlbumKey, String)> = self
            .albums
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.title.clone()))
            .collect();
        let artist_items: Vec<(ArtistKey, String)> = self
            .artists
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.name.clone()))
            .collect();

        self.search_index.lock().await.search(
            substring,
            term_string,
            song_items.into_iter(),
            album_items.into_iter(),
            artist_items.into_iter(),
        )
    }

    pub async fn get_canonical_file_name(&self, key: &SongKey, ext: &str) -> Option<String> {
        let song = self.songs.read().await.get(key).cloned()?;
        let album = self.albums.read().await.get(&song.album).cloned()?;
        let artists = self.artists.read().await;
        let resolve = |k: &ArtistKey| artists.get(k).map(|a| a.name.clone()).unwrap_or_else(|| k.as_str().to_string());
        Some(canonical::canonical_filename(&song, &album, resolve, ext))
    }

    // -- Pictures -----------------------------------------------------

    async fn locate_song(&self, key: &SongKey) -> Result<(Arc<AudioFileFragment>, PathBuf)> {
        let (afi_enc, _) = key
            .split()
            .ok_or_else(|| Error::InvalidPath(PathBuf::from(key.as_str())))?;
        let afi_hash = crate::hashing::decode(afi_enc).ok_or_else(|| Error::InvalidPath(PathBuf::from(key.as_str())))?;
        let afi = self
            .fragments
            .read()
            .await
            .get(&afi_hash)
            .cloned()
            .ok_or_else(|| Error::InvalidPath(PathBuf::from(key.as_str())))?;
        let relative_path = self
            .songs
            .read()
            .await
            .get(key)
            .map(|s| s.relative_path.clone())
            .ok_or_else(|| Error::MissingFile(PathBuf::from(key.as_str())))?;
        let root = afi.root().to_path_buf();
        Ok((afi, root.join(relative_path)))
    }

    pub async fn get_song_picture(&self, key: &SongKey, prefer_internal: bool) -> Result<Option<Vec<u8>>> {
        let (afi, path) = self.locate_song(key).await?;
        afi.get_image_for_song(&path, prefer_internal).await
    }

    pub async fn set_song_picture(&self, key: &SongKey, bytes: Vec<u8>) -> Result<()> {
        let (afi, path) = self.locate_song(key).await?;
        afi.set_image_for_song(&path, bytes).await
    }

    pub async fn get_album_picture(&self, key: &AlbumKey, prefer_internal: bool) -> Result<Option<Vec<u8>>> {
        let Some(song_key) = self.albums.read().await.get(key).and_then(|a| a.songs.first().cloned()) else {
            return Ok(None);
        };
        self.get_song_picture(&song_key, prefer_internal).await
    }

    pub async fn set_album_picture(&self, key: &AlbumKey, bytes: Vec<u8>) -> Result<()> {
        let Some(song_keys) = self.albums.read().await.get(key).map(|a| a.songs.clone()) else {
            return Ok(());
        };
        for song_key in song_keys {
            self.set_song_picture(&song_key, bytes.clone()).await?;
        }
        Ok(())
    }

    // -- Metadata override / ignore rules -------------------------------

    async fn afi_for_path(&self, absolute_path: &Path) -> Result<Arc<AudioFileFragment>> {
        let path_str = absolute_path.to_string_lossy().to_string();
        let hash = self
            .afi_registry
            .read()
            .await
            .root_for_path(&path_str)
            .map(|(_, h)| h);
        let Some(hash) = hash else {
            return Err(Error::InvalidPath(absolute_path.to_path_buf()));
        };
        self.fragments
            .read()
            .await
            .get(&hash)
            .cloned()
            .ok_or_else(|| Error::InvalidPath(absolute_path.to_path_buf()))
    }

    pub async fn get_metadata(&self, absolute_path: &Path) -> Result<Option<FullMetadata>> {
        self.afi_for_path(absolute_path).await?.get_metadata_for_song(absolute_path).await
    }

    pub async fn update_metadata(&self, absolute_path: &Path, partial: PartialMetadata) -> Result<bool> {
        self.afi_for_path(absolute_path).await?.update_metadata(absolute_path, partial).await
    }

    pub async fn add_ignore_item(&self, kind: IgnoreKind, value: &str) {
        self.ignore_rules.add_item(kind, value).await;
    }

    pub async fn remove_ignore_item(&self, kind: IgnoreKind, value: &str) {
        self.ignore_rules.remove_item(kind, value).await;
    }

    // -- Persistence -----------------------------------------------------

    async fn save_now(&self) -> Result<()> {
        let snapshot = DatabaseSnapshot {
            songs: self.songs.read().await.clone(),
            albums: self.albums.read().await.clone(),
            artists: self.artists.read().await.clone(),
            album_title_index: self.album_title_index.read().await.clone(),
            artist_name_index: self.artist_name_index.read().await.clone(),
            locations: self.afi_registry.read().await.roots().map(String::from).collect(),
        };
        let body = serde_json::to_string(&snapshot).map_err(|e| Error::Corrupt(e.to_string()))?;
        self.persist.set_item(&self.config.database_persist_key, body).await
    }

    pub async fn save(&self) -> Result<()> {
        self.save_now().await
    }

    pub async fn load(&self) -> Result<()> {
        let Some(raw) = self.persist.get_item(&self.config.database_persist_key).await? else {
            return Ok(());
        };
        let snapshot: DatabaseSnapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "database blob corrupt, starting empty");
                return Ok(());
            }
        };

        *self.songs.write().await = snapshot.songs;
        *self.albums.write().await = snapshot.albums;
        *self.artists.write().await = snapshot.artists;
        *self.album_title_index.write().await = snapshot.album_title_index;
        *self.artist_name_index.write().await = snapshot.artist_name_index;
        self.search_index.lock().await.invalidate();

        for root in snapshot.locations {
            self.add_file_location(PathBuf::from(root)).await?;
        }
        self.ignore_rules.load().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;
    use crate::tag_reader::LoftyTagReader;

    fn new_db() -> Arc<Database> {
        Database::new(
            Arc::new(MemoryPersist::default()),
            Arc::new(LoftyTagReader::new()),
            Config::default(),
        )
    }

    fn full(path: &str, title: &str, album: &str, year: i32, track: u32, artists: &[&str]) -> FullMetadata {
        FullMetadata {
            relative_path: path.to_string(),
            dirname: Path::new(path).parent().unwrap().to_string_lossy().to_string(),
            title: title.to_string(),
            album_title: album.to_string(),
            year,
            track,
            disk_name: None,
            vatype: VaType::None,
            primary_artists: artists.iter().map(|s| s.to_string()).collect(),
            secondary_artists: Vec::new(),
            variations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn adding_a_song_creates_album_and_artist() {
        let db = new_db();
        let key = SongKey::new(1, 1);
        db.add_or_update_song(key.clone(), full("A/01.mp3", "Song", "Album", 2000, 1, &["Artist"]))
            .await;

        let song = db.get_song(&key).await.unwrap();
        assert_eq!(song.title, "Song");
        let album = db.get_album(&song.album).await.unwrap();
        assert_eq!(album.title, "Album");
        assert_eq!(album.songs, vec![key]);
    }

    #[tokio::test]
    async fn same_title_different_artists_same_directory_collapses_to_va() {
        let db = new_db();
        let k1 = SongKey::new(1, 1);
        let k2 = SongKey::new(1, 2);
        db.add_or_update_song(k1.clone(), full("A/01.mp3", "Song One", "Compilation", 2000, 1, &["Artist One"]))
            .await;
        db.add_or_update_song(k2.clone(), full("A/02.mp3", "Song Two", "Compilation", 2000, 2, &["Artist Two"]))
            .await;

        let s1 = db.get_song(&k1).await.unwrap();
        let s2 = db.get_song(&k2).await.unwrap();
        assert_eq!(s1.album, s2.album);
        let album = db.get_album(&s1.album).await.unwrap();
        assert_eq!(album.vatype, VaType::Va);
    }

    #[tokio::test]
    async fn different_directories_stay_independent_albums() {
        let db = new_db();
        let k1 = SongKey::new(1, 1);
        let k2 = SongKey::new(1, 2);
        db.add_or_update_song(k1.clone(), full("A/01.mp3", "Song", "Greatest Hits", 2000, 1, &["Artist One"]))
            .await;
        db.add_or_update_song(k2.clone(), full("B/01.mp3", "Song", "Greatest Hits", 2000, 1, &["Artist Two"]))
            .await;

        let s1 = db.get_song(&k1).await.unwrap();
        let s2 = db.get_song(&k2).await.unwrap();
        assert_ne!(s1.album, s2.album);
    }

    #[tokio::test]
    async fn removing_the_only_song_cascades_to_empty_album_and_artist() {
        let db = new_db();
        let key = SongKey::new(1, 1);
        db.add_or_update_song(key.clone(), full("A/01.mp3", "Song", "Album", 2000, 1, &["Artist"]))
            .await;
        let album_key = db.get_song(&key).await.unwrap().album;
        let artist_key = ArtistKey::for_name("Artist");

        db.del_song_by_key(&key).await;

        assert!(db.get_song(&key).await.is_none());
        assert!(db.get_album(&album_key).await.is_none());
        assert!(db.get_artist(&artist_key).await.is_none());
    }

    #[tokio::test]
    async fn a_guest_feature_is_demoted_to_secondary() {
        let db = new_db();
        let k1 = SongKey::new(1, 1);
        let k2 = SongKey::new(1, 2);
        db.add_or_update_song(k1.clone(), full("A/01.mp3", "Solo Track", "Solo Album", 2000, 1, &["Main Artist"]))
            .await;
        db.add_or_update_song(
            k2.clone(),
            full("A/02.mp3", "Feature Track", "Solo Album", 2000, 2, &["Guest Artist"]),
        )
        .await;

        let guest_song = db.get_song(&k2).await.unwrap();
        assert!(guest_song.primary_artists.is_empty());
        assert_eq!(guest_song.secondary_artists, vec![ArtistKey::for_name("Guest Artist")]);
    }

    #[tokio::test]
    async fn save_and_load_round_trips_the_graph() {
        let persist: Arc<dyn Persist> = Arc::new(MemoryPersist::default());
        let db = Database::new(persist.clone(), Arc::new(LoftyTagReader::new()), Config::default());
        let key = SongKey::new(1, 1);
        db.add_or_update_song(key.clone(), full("A/01.mp3", "Song", "Album", 2000, 1, &["Artist"]))
            .await;
        db.save().await.unwrap();

        let reloaded = Database::new(persist, Arc::new(LoftyTagReader::new()), Config::default());
        reloaded.load().await.unwrap();
        assert!(reloaded.get_song(&key).await.is_some());
    }

    #[tokio::test]
    async fn search_finds_songs_by_title() {
        let db = new_db();
        let key = SongKey::new(1, 1);
        db.add_or_update_song(key.clone(), full("A/01.mp3", "Graceland", "Album", 2000, 1, &["Artist"]))
            .await;
        let results = db.search(false, "grace").await;
        assert_eq!(results.songs, vec![key]);
    }

    #[tokio::test]
    async fn refresh_discovers_songs_under_a_registered_root() {
        use crate::tag_reader::StubTagReader;

        let dir = tempfile::tempdir().unwrap();
        let album_dir = dir.path().join("The Artist - 2000 - The Album");
        std::fs::create_dir_all(&album_dir).unwrap();
        std::fs::write(album_dir.join("01 - A Song.mp3"), b"").unwrap();

        let db = Database::new(
            Arc::new(MemoryPersist::new(dir.path())),
            Arc::new(StubTagReader::new()),
            Config::default(),
        );
        db.add_file_location(dir.path().to_path_buf()).await.unwrap();

        let outcome = db.refresh().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Completed { added: 1, removed: 0 });

        let view = db.get_flat_view().await;
        assert_eq!(view.songs.len(), 1);
        assert_eq!(view.songs[0].title, "A Song");
        assert_eq!(view.albums.len(), 1);
        assert_eq!(view.artists.len(), 1);
    }
}
