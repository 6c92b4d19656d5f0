//! Key schemes (§3 "Key schemes (bit-exact)").
//!
//! Keys are kept as their string encoding throughout the crate rather
//! than as a tagged-union sum type (§9 suggests `Key = Song(AfiId,
//! LocalId) | Album(u32) | Artist(u32)`); see DESIGN.md for why the
//! string form is kept as the one representation instead of adding a
//! parallel in-memory variant — the string already is the stable,
//! comparable, hashable identity this crate needs everywhere.

use std::fmt;

use crate::hashing::encode;
use crate::normalize::norm;

/// `S<AFI-hash-encoded>:<file-hash-encoded>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SongKey(String);

/// `L<hash>` over `norm(title)*norm(primary-artist-join)*year` (or vatype for VA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AlbumKey(String);

/// `R<hash>` over `norm(name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ArtistKey(String);

impl SongKey {
    pub fn new(afi_hash: u32, file_hash: u32) -> Self {
        SongKey(format!("S{}:{}", encode(afi_hash), encode(file_hash)))
    }

    /// Split a song key into its encoded AFI-hash prefix and file-hash
    /// suffix, per §4.A ("split on the first `:`").
    pub fn split(&self) -> Option<(&str, &str)> {
        let rest = self.0.strip_prefix('S')?;
        rest.split_once(':')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AlbumKey {
    /// Build an album key over a title/artist-join/year triple.
    pub fn for_artists(title: &str, artist_join: &str, year: i32) -> Self {
        Self::from_hash_input(title, artist_join, &year.to_string())
    }

    /// Build an album key for a VA/OST album, over title/vatype/year.
    pub fn for_vatype(title: &str, vatype: &str, year: i32) -> Self {
        Self::from_hash_input(title, vatype, &year.to_string())
    }

    fn from_hash_input(title: &str, second: &str, year: &str) -> Self {
        let input = format!("{}*{}*{}", norm(title), second, year);
        let h = crate::hashing::hash_str(0, &input);
        AlbumKey(format!("L{}", encode(h)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ArtistKey {
    pub fn for_name(name: &str) -> Self {
        let h = crate::hashing::hash_str(0, &norm(name));
        ArtistKey(format!("R{}", encode(h)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SongKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ArtistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_key_splits_on_first_colon() {
        let key = SongKey::new(1, 2);
        let (afi, file) = key.split().unwrap();
        assert_eq!(afi, crate::hashing::encode(1));
        assert_eq!(file, crate::hashing::encode(2));
    }

    #[test]
    fn album_key_is_stable_for_same_normalized_inputs() {
        let a = AlbumKey::for_artists("The Best Album", "Some Artist", 2001);
        let b = AlbumKey::for_artists("the   best album", "Some Artist", 2001);
        assert_eq!(a, b);
    }

    #[test]
    fn album_key_distinguishes_by_year() {
        let a = AlbumKey::for_artists("Album", "Artist", 2001);
        let b = AlbumKey::for_artists("Album", "Artist", 2002);
        assert_ne!(a, b);
    }

    #[test]
    fn artist_key_is_stable_for_same_normalized_name() {
        let a = ArtistKey::for_name("The Beatles");
        let b = ArtistKey::for_name("beatles");
        assert_eq!(a, b);
    }
}
