//! A persistent, incrementally-refreshable index of songs, albums and
//! artists over a set of music directories.
//!
//! [`Database`] is the main entry point: register one or more roots
//! with [`Database::add_file_location`], call [`Database::refresh`] to
//! scan them, then query the resulting graph with [`Database::get_song`]
//! / [`Database::search`] / etc. Persistence, tag extraction and the
//! on-disk file-list index all go through injected collaborators
//! ([`Persist`], [`TagReader`]) so the crate has no hard dependency on a
//! particular filesystem layout or tag library beyond its defaults.

mod blob_store;
mod canonical;
mod config;
mod database;
mod debounce;
mod error;
mod file_list;
mod fragment;
mod hashing;
mod ignore;
mod keys;
mod metadata;
mod metadata_store;
mod models;
mod normalize;
mod persist;
mod registry;
mod search;
mod tag_reader;

pub use config::{Config, SameTitleDifferentArtists};
pub use database::{Database, FlatView, RefreshOutcome};
pub use error::{Error, Result};
pub use fragment::AudioFileFragment;
pub use ignore::IgnoreKind;
pub use keys::{AlbumKey, ArtistKey, SongKey};
pub use metadata::{FullMetadata, PartialMetadata, VaType};
pub use models::{Album, Artist, Song};
pub use persist::{FsPersist, MemoryPersist, Persist};
pub use search::SearchResults;
pub use tag_reader::{LoftyTagReader, StubTagReader, TagReader};
