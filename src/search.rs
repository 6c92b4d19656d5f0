//! Keyword search index (§4.F "Search index (4.G)"): a word-token
//! multimap per entity kind, built lazily and invalidated on mutation.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::keys::{AlbumKey, ArtistKey, SongKey};
use crate::normalize::norm;

/// A prefix/infix word index over one entity kind's display strings.
struct TermIndex<K> {
    built: Option<HashMap<String, HashSet<K>>>,
}

impl<K: Clone + Eq + Hash> TermIndex<K> {
    fn new() -> Self {
        Self { built: None }
    }

    fn invalidate(&mut self) {
        self.built = None;
    }

    fn ensure_built(&mut self, items: impl Iterator<Item = (K, String)>) {
        if self.built.is_some() {
            return;
        }
        let mut map: HashMap<String, HashSet<K>> = HashMap::new();
        for (key, text) in items {
            for word in norm(&text).split_whitespace() {
                if word.is_empty() {
                    continue;
                }
                map.entry(word.to_string()).or_default().insert(key.clone());
            }
        }
        self.built = Some(map);
    }

    fn query_term(&self, term: &str, substring: bool) -> HashSet<K> {
        let Some(index) = &self.built else {
            return HashSet::new();
        };
        let term = norm(term);
        let mut out = HashSet::new();
        for (word, keys) in index {
            let matches = if substring {
                word.contains(&term)
            } else {
                word.starts_with(&term)
            };
            if matches {
                out.extend(keys.iter().cloned());
            }
        }
        out
    }

    /// AND the per-term matches across every term in `term_string`.
    fn search(&mut self, substring: bool, terms: &[&str], items: impl Iterator<Item = (K, String)>) -> Vec<K> {
        self.ensure_built(items);
        let mut result: Option<HashSet<K>> = None;
        for term in terms {
            let matches = self.query_term(term, substring);
            result = Some(match result {
                None => matches,
                Some(acc) => acc.intersection(&matches).cloned().collect(),
            });
        }
        result.unwrap_or_default().into_iter().collect()
    }
}

#[derive(Default)]
pub struct SearchResults {
    pub songs: Vec<SongKey>,
    pub albums: Vec<AlbumKey>,
    pub artists: Vec<ArtistKey>,
}

/// The three per-kind term indices (songs / albums / artists).
pub struct SearchIndex {
    songs: TermIndex<SongKey>,
    albums: TermIndex<AlbumKey>,
    artists: TermIndex<ArtistKey>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self {
            songs: TermIndex::new(),
            albums: TermIndex::new(),
            artists: TermIndex::new(),
        }
    }

    pub fn invalidate(&mut self) {
        self.songs.invalidate();
        self.albums.invalidate();
        self.artists.invalidate();
    }

    /// `substring=false` queries by prefix, `true` by infix. Terms are
    /// split on whitespace and ANDed together, per kind.
    pub fn search(
        &mut self,
        substring: bool,
        term_string: &str,
        song_items: impl Iterator<Item = (SongKey, String)>,
        album_items: impl Iterator<Item = (AlbumKey, String)>,
        artist_items: impl Iterator<Item = (ArtistKey, String)>,
    ) -> SearchResults {
        let terms: Vec<&str> = term_string.split_whitespace().collect();
        if terms.is_empty() {
            return SearchResults::default();
        }
        SearchResults {
            songs: self.songs.search(substring, &terms, song_items),
            albums: self.albums.search(substring, &terms, album_items),
            artists: self.artists.search(substring, &terms, artist_items),
        }
    }
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::encode;

    fn song_key(n: u32) -> SongKey {
        SongKey::new(1, n)
    }

    #[test]
    fn prefix_search_matches_the_start_of_a_word() {
        let mut index = SearchIndex::new();
        let items = vec![
            (song_key(1), "Graceland".to_string()),
            (song_key(2), "You Can Call Me Al".to_string()),
        ];
        let result = index.search(
            false,
            "grace",
            items.into_iter(),
            std::iter::empty(),
            std::iter::empty(),
        );
        assert_eq!(result.songs, vec![song_key(1)]);
    }

    #[test]
    fn infix_search_matches_anywhere_in_a_word() {
        let mut index = SearchIndex::new();
        let items = vec![(song_key(1), "Graceland".to_string())];
        let result = index.search(
            true,
            "celan",
            items.into_iter(),
            std::iter::empty(),
            std::iter::empty(),
        );
        assert_eq!(result.songs, vec![song_key(1)]);
    }

    #[test]
    fn multiple_terms_are_intersected() {
        let mut index = SearchIndex::new();
        let items = vec![
            (song_key(1), "Paul Simon Graceland".to_string()),
            (song_key(2), "Paul Anka Greatest".to_string()),
        ];
        let result = index.search(
            false,
            "paul simon",
            items.into_iter(),
            std::iter::empty(),
            std::iter::empty(),
        );
        assert_eq!(result.songs, vec![song_key(1)]);
    }

    #[test]
    fn encode_is_used_consistently_for_song_keys_in_tests() {
        assert_eq!(encode(1).len(), 6);
    }
}
