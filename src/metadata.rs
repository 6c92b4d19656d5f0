//! Metadata shapes shared by the tag parser, the per-root metadata
//! store (§4.C) and the AFI resolution pipeline (§4.E).

use serde::{Deserialize, Serialize};

/// VA/OST album marker (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VaType {
    #[default]
    None,
    Va,
    Ost,
}

impl VaType {
    pub fn as_str(self) -> &'static str {
        match self {
            VaType::None => "",
            VaType::Va => "va",
            VaType::Ost => "ost",
        }
    }
}

/// What the metadata store caches per root-relative path: every field
/// but `original_path` is optional (§4.C). The two array-valued fields
/// (`artists`, `variations`) compare as sets for the store's equality
/// check; everything else compares by value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialMetadata {
    pub original_path: String,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    /// Encodes disk per §3 invariant 6: `track = trackOnDisk + diskNum*100`.
    pub track: Option<u32>,
    pub disk_name: Option<String>,
    pub vatype: Option<VaType>,
    pub artists: Option<Vec<String>>,
    pub variations: Option<Vec<String>>,
}

impl PartialMetadata {
    pub fn new(original_path: impl Into<String>) -> Self {
        Self {
            original_path: original_path.into(),
            ..Default::default()
        }
    }

    /// §4.C's `set()` no-op check: array-valued fields compare as sets,
    /// everything else by value.
    pub fn semantically_equal(&self, other: &Self) -> bool {
        self.original_path == other.original_path
            && self.title == other.title
            && self.album == other.album
            && self.year == other.year
            && self.track == other.track
            && self.disk_name == other.disk_name
            && self.vatype == other.vatype
            && set_eq(&self.artists, &other.artists)
            && set_eq(&self.variations, &other.variations)
    }

    /// Merge `self` (e.g. freshly parsed metadata) with an override,
    /// where present override fields win.
    pub fn merged_with_override(&self, over: &PartialMetadata) -> PartialMetadata {
        PartialMetadata {
            original_path: self.original_path.clone(),
            title: over.title.clone().or_else(|| self.title.clone()),
            album: over.album.clone().or_else(|| self.album.clone()),
            year: over.year.or(self.year),
            track: over.track.or(self.track),
            disk_name: over.disk_name.clone().or_else(|| self.disk_name.clone()),
            vatype: over.vatype.or(self.vatype),
            artists: over.artists.clone().or_else(|| self.artists.clone()),
            variations: over.variations.clone().or_else(|| self.variations.clone()),
        }
    }

    /// Heuristic used by §4.E step 4: does this record have everything
    /// `addOrUpdateSong` needs without falling back to the tag parser?
    pub fn is_complete(&self) -> bool {
        self.title.is_some()
            && self.album.is_some()
            && self.year.is_some()
            && self.track.is_some()
            && self.artists.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn into_full(self, dirname: String) -> Option<FullMetadata> {
        Some(FullMetadata {
            relative_path: self.original_path,
            dirname,
            title: self.title?,
            album_title: self.album?,
            year: self.year?,
            track: self.track?,
            disk_name: self.disk_name,
            vatype: self.vatype.unwrap_or_default(),
            primary_artists: self.artists.filter(|a| !a.is_empty())?,
            secondary_artists: Vec::new(),
            variations: self.variations.unwrap_or_default(),
        })
    }
}

fn set_eq(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> bool {
    use std::collections::HashSet;
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            let a: HashSet<&String> = a.iter().collect();
            let b: HashSet<&String> = b.iter().collect();
            a == b
        }
        _ => false,
    }
}

/// A fully resolved record, ready for `addOrUpdateSong` (§4.F).
#[derive(Debug, Clone)]
pub struct FullMetadata {
    pub relative_path: String,
    pub dirname: String,
    pub title: String,
    pub album_title: String,
    pub year: i32,
    pub track: u32,
    pub disk_name: Option<String>,
    pub vatype: VaType,
    pub primary_artists: Vec<String>,
    pub secondary_artists: Vec<String>,
    pub variations: Vec<String>,
}

impl FullMetadata {
    /// Disk number per §3 invariant 6: `floor(track/100)`.
    pub fn disk_num(&self) -> u32 {
        self.track / 100
    }

    /// Track-on-disk component per §3 invariant 6.
    pub fn track_on_disk(&self) -> u32 {
        self.track % 100
    }
}
