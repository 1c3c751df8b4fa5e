//! Winamp B4S playlist markup.
//!
//! ```text
//! <?xml version="1.0" encoding='UTF-8' standalone="yes"?>
//! <WinampXML>
//!   <playlist num_entries="2" label="Playlist 001">
//!     <entry Playstring="file:/music/demo.mp3">
//!       <Name>demo</Name>
//!       <Length>120</Length>
//!     </entry>
//!   </playlist>
//! </WinampXML>
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use quick_xml::escape::escape;
use serde::Deserialize;
use tracing::error;

use crate::playlist::{Playlist, PlaylistError, PlaylistItem};
use crate::PlaylistConfig;

#[derive(Debug, Deserialize)]
struct Document {
    playlist: Option<PlaylistElement>,
}

#[derive(Debug, Deserialize)]
struct PlaylistElement {
    #[serde(rename = "@label")]
    label: Option<String>,
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(rename = "@Playstring")]
    playstring: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Length")]
    length: Option<String>,
}

/// Parse a playlist document.
///
/// Entries without a play string or display title are skipped. A malformed
/// document, a missing playlist element or a document with zero entries
/// fails cleanly with no partial item list.
pub fn load<R: BufRead>(reader: R, config: &PlaylistConfig) -> Result<Playlist, PlaylistError> {
    let document: Document = quick_xml::de::from_reader(reader)?;
    let playlist = document.playlist.ok_or(PlaylistError::MissingPlaylist)?;
    if playlist.entries.is_empty() {
        return Err(PlaylistError::NoEntries);
    }

    let mut items = Vec::new();
    for entry in &playlist.entries {
        let Some(playstring) = entry.playstring.as_deref() else {
            continue;
        };
        let path = strip_scheme(playstring);
        if path.is_empty() {
            continue;
        }
        let Some(title) = entry.name.clone() else {
            continue;
        };
        let duration_secs = entry
            .length
            .as_deref()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0);
        items.push(PlaylistItem {
            path: substitute_path(path, &config.path_substitutions),
            title,
            duration_secs,
        });
    }

    Ok(Playlist {
        label: playlist.label.clone().unwrap_or_default(),
        items,
    })
}

pub fn load_path(path: &Path, config: &PlaylistConfig) -> Result<Playlist, PlaylistError> {
    let file = File::open(path)?;
    load(BufReader::new(file), config)
}

/// Serialize a playlist. An empty item list skips the write entirely.
pub fn save<W: Write>(playlist: &Playlist, mut writer: W) -> Result<(), PlaylistError> {
    if playlist.items.is_empty() {
        return Ok(());
    }

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding='UTF-8' standalone=\"yes\"?>\n");
    out.push_str("<WinampXML>\n");
    out.push_str(&format!(
        "  <playlist num_entries=\"{}\" label=\"{}\">\n",
        playlist.items.len(),
        escape(&playlist.label),
    ));
    for item in &playlist.items {
        out.push_str(&format!(
            "    <entry Playstring=\"file:{}\">\n",
            escape(&item.path),
        ));
        out.push_str(&format!("      <Name>{}</Name>\n", escape(&item.title)));
        out.push_str(&format!("      <Length>{}</Length>\n", item.duration_secs));
        out.push_str("    </entry>\n");
    }
    out.push_str("  </playlist>\n");
    out.push_str("</WinampXML>\n");

    writer.write_all(out.as_bytes())?;
    Ok(())
}

pub fn save_path(playlist: &Playlist, path: &Path) -> Result<(), PlaylistError> {
    if playlist.items.is_empty() {
        return Ok(());
    }
    let file = match File::create(path) {
        Ok(file) => file,
        Err(err) => {
            error!(path = %path.display(), "could not save playlist: {err}");
            return Err(err.into());
        }
    };
    save(playlist, BufWriter::new(file))
}

/// Drop the `<scheme>:` prefix of a play string.
fn strip_scheme(playstring: &str) -> &str {
    match playstring.find(':') {
        Some(pos) if pos > 0 => &playstring[pos + 1..],
        _ => playstring,
    }
}

/// First matching prefix rewrite wins.
fn substitute_path(path: &str, substitutions: &[(String, String)]) -> String {
    for (from, to) in substitutions {
        if let Some(rest) = path.strip_prefix(from.as_str()) {
            return format!("{to}{rest}");
        }
    }
    path.to_owned()
}
