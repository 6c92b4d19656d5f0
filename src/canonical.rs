//! Canonical filename rendering (§4.F "Canonical filename").

use crate::keys::ArtistKey;
use crate::metadata::VaType;
use crate::models::{Album, Song};

/// Join display names with `,` between all but the last pair and a
/// final ` & `, per §4.F ("multi-artist display joins with `,` and
/// final ` & `").
fn join_artists(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        _ => {
            let (last, rest) = names.split_last().unwrap();
            format!("{} & {}", rest.join(", "), last)
        }
    }
}

fn header(album: &Album, resolve: &impl Fn(&ArtistKey) -> String) -> String {
    match album.vatype {
        VaType::Ost => "Soundtrack".to_string(),
        VaType::Va => "VA".to_string(),
        VaType::None => {
            let names: Vec<String> = album.primary_artists.iter().map(resolve).collect();
            join_artists(&names)
        }
    }
}

/// `/` for a single-disk album (`track < 99`), otherwise
/// `/Disk N/` or `/Disk N- <diskName>/` when a non-empty name is set.
fn disk_piece(song: &Song, album: &Album) -> String {
    if song.track < 99 {
        return "/".to_string();
    }
    let n = song.disk_num();
    match album.disk_names.get(n as usize).and_then(|o| o.as_deref()) {
        Some(name) if !name.is_empty() => format!("/Disk {n}- {name}/"),
        _ => format!("/Disk {n}/"),
    }
}

fn needs_song_artist_prefix(song: &Song, album: &Album) -> bool {
    album.vatype != VaType::None || song.primary_artists != album.primary_artists
}

fn variation_suffixes(song: &Song) -> String {
    song.variations.iter().map(|v| format!(" [{v}]")).collect()
}

fn featuring_suffix(song: &Song, resolve: &impl Fn(&ArtistKey) -> String) -> String {
    if song.secondary_artists.is_empty() {
        return String::new();
    }
    let names: Vec<String> = song.secondary_artists.iter().map(resolve).collect();
    format!(" (feat. {})", join_artists(&names))
}

/// §9 Open Question: "space-hyphen-space replacement for artist names
/// embedded in song titles" — a title containing the literal `with -`
/// is rewritten to `w-` so it can't be mistaken for the grammar's own
/// ` - ` separators. Downstream display rules beyond this are not
/// further specified.
fn sanitize_embedded_artist(title: &str) -> String {
    title.replace("with -", "w-")
}

/// Render a song's canonical relative filename, per §4.F's grammar.
pub fn canonical_filename(
    song: &Song,
    album: &Album,
    resolve_artist: impl Fn(&ArtistKey) -> String,
    ext: &str,
) -> String {
    let header = header(album, &resolve_artist);
    let disk_piece = disk_piece(song, album);
    let track = format!("{:02}", song.track_on_disk());
    let prefix = if needs_song_artist_prefix(song, album) && !song.primary_artists.is_empty() {
        let names: Vec<String> = song.primary_artists.iter().map(&resolve_artist).collect();
        format!("{} - ", join_artists(&names))
    } else {
        String::new()
    };
    let title = sanitize_embedded_artist(&song.title);
    let variations = variation_suffixes(song);
    let featuring = featuring_suffix(song, &resolve_artist);

    format!(
        "{header} - {year} - {album_title}{disk_piece}{track} - {prefix}{title}{variations}{featuring}.{ext}",
        header = header,
        year = album.year,
        album_title = album.title,
        disk_piece = disk_piece,
        track = track,
        prefix = prefix,
        title = title,
        variations = variations,
        featuring = featuring,
        ext = ext,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{AlbumKey, SongKey};

    fn resolve(key: &ArtistKey) -> String {
        key.as_str().to_string()
    }

    fn song(title: &str, track: u32, album: &AlbumKey) -> Song {
        Song {
            key: SongKey::new(1, 2),
            relative_path: "x".into(),
            title: title.to_string(),
            track,
            album: album.clone(),
            primary_artists: vec![],
            secondary_artists: vec![],
            variations: vec![],
        }
    }

    #[test]
    fn header_uses_soundtrack_and_va_markers() {
        let album = Album::new(AlbumKey::for_vatype("t", "ost", 2000), "t".into(), 2000, VaType::Ost);
        assert_eq!(header(&album, &resolve), "Soundtrack");

        let album = Album::new(AlbumKey::for_vatype("t", "va", 2000), "t".into(), 2000, VaType::Va);
        assert_eq!(header(&album, &resolve), "VA");
    }

    #[test]
    fn multi_disk_album_uses_disk_folder() {
        let key = AlbumKey::for_artists("Big", "Artist", 1999);
        let mut album = Album::new(key.clone(), "Big".into(), 1999, VaType::None);
        album.set_disk_name(2, Some("Bonus".into()));
        let s = song("Track", 205, &key);
        let rendered = canonical_filename(&s, &album, resolve, "flac");
        assert!(rendered.contains("/Disk 2- Bonus/05"));
    }

    #[test]
    fn single_disk_album_uses_plain_separator() {
        let key = AlbumKey::for_artists("Small", "Artist", 1999);
        let album = Album::new(key.clone(), "Small".into(), 1999, VaType::None);
        let s = song("Track", 3, &key);
        let rendered = canonical_filename(&s, &album, resolve, "mp3");
        assert!(rendered.contains("Small/03"));
    }
}
