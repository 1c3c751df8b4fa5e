//! Playlist load/save boundary.

pub mod b4s;

use thiserror::Error;

pub use b4s::{load, load_path, save, save_path};

/// One playable entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
    /// Resolved file path, scheme already stripped.
    pub path: String,
    /// Display title.
    pub title: String,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    pub label: String,
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("unable to parse playlist markup: {0}")]
    Parse(#[from] quick_xml::DeError),
    #[error("playlist document has no playlist element")]
    MissingPlaylist,
    #[error("playlist has no entries")]
    NoEntries,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
