//! Entity shapes (§3 "Entities").

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::keys::{AlbumKey, ArtistKey, SongKey};
use crate::metadata::VaType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub key: SongKey,
    pub relative_path: String,
    pub title: String,
    /// Encodes disk per §3 invariant 6: `track = trackOnDisk + diskNum*100`.
    pub track: u32,
    pub album: AlbumKey,
    pub primary_artists: Vec<ArtistKey>,
    pub secondary_artists: Vec<ArtistKey>,
    pub variations: Vec<String>,
}

impl Song {
    pub fn disk_num(&self) -> u32 {
        self.track / 100
    }

    pub fn track_on_disk(&self) -> u32 {
        self.track % 100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub key: AlbumKey,
    pub title: String,
    pub year: i32,
    pub vatype: VaType,
    pub primary_artists: Vec<ArtistKey>,
    /// Ordered by insertion.
    pub songs: Vec<SongKey>,
    /// Indexed by disk number (§9 Open Question: sized by monotonic
    /// extension, preserving previously-set non-empty names).
    pub disk_names: Vec<Option<String>>,
    /// Containing directories of this album's songs, used by
    /// `getOrNewAlbum`'s "same title, same directory, different
    /// artists" disambiguation (§4.F).
    pub directories: HashSet<String>,
}

impl Album {
    pub fn new(key: AlbumKey, title: String, year: i32, vatype: VaType) -> Self {
        Self {
            key,
            title,
            year,
            vatype,
            primary_artists: Vec::new(),
            songs: Vec::new(),
            disk_names: Vec::new(),
            directories: HashSet::new(),
        }
    }

    /// Extend `disk_names` to cover `disk_num`, without overwriting an
    /// already-set non-empty name at that slot.
    pub fn set_disk_name(&mut self, disk_num: u32, name: Option<String>) {
        let idx = disk_num as usize;
        if self.disk_names.len() <= idx {
            self.disk_names.resize(idx + 1, None);
        }
        if let Some(name) = name {
            if self.disk_names[idx].is_none() {
                self.disk_names[idx] = Some(name);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    pub key: ArtistKey,
    pub name: String,
    pub songs: Vec<SongKey>,
    pub albums: Vec<AlbumKey>,
}

impl Artist {
    pub fn new(key: ArtistKey, name: String) -> Self {
        Self {
            key,
            name,
            songs: Vec::new(),
            albums: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_disk_name_preserves_existing_non_empty_entries() {
        let mut album = Album::new(AlbumKey::for_artists("t", "a", 2000), "t".into(), 2000, VaType::None);
        album.set_disk_name(1, Some("Bonus Disc".into()));
        album.set_disk_name(1, Some("Overwrite Attempt".into()));
        assert_eq!(album.disk_names[1].as_deref(), Some("Bonus Disc"));
    }

    #[test]
    fn set_disk_name_extends_monotonically() {
        let mut album = Album::new(AlbumKey::for_artists("t", "a", 2000), "t".into(), 2000, VaType::None);
        album.set_disk_name(3, None);
        assert_eq!(album.disk_names.len(), 4);
    }
}
