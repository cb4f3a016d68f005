use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display metadata used as the search key on the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
}

impl TrackInfo {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTrack {
    /// Metadata embedded in the playlist entry (e.g. user uploads).
    Inline { title: String, artist: String },
    /// Opaque id that needs a store or library lookup.
    Catalog { catalog_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub created_at: i64,
    pub track: SourceTrack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePlaylist {
    pub name: String,
    pub created_at: i64,
    pub last_modified_at: i64,
    pub entries: Vec<PlaylistEntry>,
}

/// Personal library: catalog id -> metadata.
pub type LibraryIndex = HashMap<String, TrackInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPlaylist {
    pub id: String,
    pub name: String,
}

/// Outcome of resolving one source track against the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Found(String),
    NotFound(String),
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Split resolutions into (found ids, not-found labels), keeping relative order.
pub fn partition_resolutions(results: Vec<Resolution>) -> (Vec<String>, Vec<String>) {
    let mut found = Vec::new();
    let mut not_found = Vec::new();
    for r in results {
        match r {
            Resolution::Found(id) => found.push(id),
            Resolution::NotFound(label) => not_found.push(label),
        }
    }
    (found, not_found)
}
