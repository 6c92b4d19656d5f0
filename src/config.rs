//! Tunables (§4.J `[ADDED]`).
//!
//! A plain struct, not a global — §9's redesign note asks for the
//! teacher's `OnceCell<Arc<Paths>>` / `OnceCell<Arc<UserConfig>>` style
//! singletons to become explicit values threaded through constructors.

use std::time::Duration;

/// Collision-handling behavior for "same normalized title, different
/// artists, same directory" (§9 Open Questions): the spec adopts
/// collapse-to-VA, but real deployments may want independent albums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameTitleDifferentArtists {
    /// Flag the existing album as VA and clear its primary artists.
    CollapseToVa,
    /// Treat the incoming song as a new, independent album.
    KeepIndependent,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Trailing-edge debounce interval shared by the metadata store,
    /// song-key map, blob-store index and ignore-rule set (§5).
    pub debounce_interval: Duration,
    /// Grace period a caller waits for an in-flight `refresh()` (§5).
    pub refresh_grace_period: Duration,
    /// Case-insensitive extensions recognized as audio files (§4.B).
    pub audio_suffixes: Vec<String>,
    /// Case-insensitive extensions recognized as cover art (§4.B).
    pub image_suffixes: Vec<String>,
    /// §9 Open Question: how "same title, different artists, same dir" resolves.
    pub same_title_different_artists: SameTitleDifferentArtists,
    /// Aggregate database persistence key (§6, default `audio-database`).
    pub database_persist_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_interval: Duration::from_millis(250),
            refresh_grace_period: Duration::from_millis(100),
            audio_suffixes: vec!["flac", "mp3", "aac", "m4a"]
                .into_iter()
                .map(String::from)
                .collect(),
            image_suffixes: vec!["png", "jpg", "jpeg", "heic", "hei"]
                .into_iter()
                .map(String::from)
                .collect(),
            same_title_different_artists: SameTitleDifferentArtists::CollapseToVa,
            database_persist_key: "audio-database".to_string(),
        }
    }
}

impl Config {
    pub fn is_audio_suffix(&self, ext: &str) -> bool {
        self.audio_suffixes.iter().any(|s| s.eq_ignore_ascii_case(ext))
    }

    pub fn is_image_suffix(&self, ext: &str) -> bool {
        self.image_suffixes.iter().any(|s| s.eq_ignore_ascii_case(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_suffix_checks_are_case_insensitive() {
        let cfg = Config::default();
        assert!(cfg.is_audio_suffix("FLAC"));
        assert!(cfg.is_image_suffix("JPG"));
        assert!(!cfg.is_audio_suffix("txt"));
    }
}
