use super::SourceCatalog;
use crate::error::SyncError;
use crate::models::{LibraryIndex, PlaylistEntry, SourcePlaylist, SourceTrack, TrackInfo};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// On-disk library export: playlists with their entries, the personal
/// library, and store metadata for the store tracks referenced by playlists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    #[serde(default)]
    pub playlists: Vec<ExportPlaylist>,
    #[serde(default)]
    pub library: Vec<ExportSong>,
    #[serde(default)]
    pub store: HashMap<String, TrackInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPlaylist {
    pub name: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub creation_timestamp: i64,
    #[serde(default, deserialize_with = "timestamp")]
    pub last_modified_timestamp: i64,
    #[serde(default)]
    pub tracks: Vec<ExportEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    #[serde(default, deserialize_with = "timestamp")]
    pub creation_timestamp: i64,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSong {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
}

/// Exports write timestamps either as JSON numbers or as decimal strings.
fn timestamp<'de, D>(de: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }
    match Raw::deserialize(de)? {
        Raw::Int(i) => Ok(i),
        Raw::Float(f) => Ok(f as i64),
        Raw::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| serde::de::Error::custom(format!("bad timestamp '{}': {}", s, e))),
    }
}

impl ExportEntry {
    fn into_entry(self) -> Result<PlaylistEntry> {
        let track = match (self.title, self.track_id) {
            (Some(title), _) => SourceTrack::Inline {
                title,
                artist: self.artist.unwrap_or_default(),
            },
            (None, Some(catalog_id)) => SourceTrack::Catalog { catalog_id },
            (None, None) => return Err(anyhow!("playlist entry has neither title nor trackId")),
        };
        Ok(PlaylistEntry {
            created_at: self.creation_timestamp,
            track,
        })
    }
}

impl Export {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| anyhow!("parse export json: {}", e))
    }

    /// Typed playlists; entries that carry no usable reference fail the whole
    /// playlist conversion.
    pub fn source_playlists(&self) -> Result<Vec<SourcePlaylist>> {
        self.playlists
            .iter()
            .cloned()
            .map(|p| {
                let name = p.name.clone();
                let entries = p
                    .tracks
                    .into_iter()
                    .map(ExportEntry::into_entry)
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("reading playlist '{}'", name))?;
                Ok(SourcePlaylist {
                    name: p.name,
                    created_at: p.creation_timestamp,
                    last_modified_at: p.last_modified_timestamp,
                    entries,
                })
            })
            .collect()
    }

    pub fn library_index(&self) -> LibraryIndex {
        self.library
            .iter()
            .map(|s| (s.id.clone(), TrackInfo::new(s.title.clone(), s.artist.clone())))
            .collect()
    }
}

/// Source catalog backed by a JSON library export.
pub struct ExportSource {
    path: Option<PathBuf>,
    export: tokio::sync::Mutex<Option<Arc<Export>>>,
}

impl ExportSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            export: tokio::sync::Mutex::new(None),
        }
    }

    /// Already-loaded export (tests, piping).
    pub fn from_export(export: Export) -> Self {
        Self {
            path: None,
            export: tokio::sync::Mutex::new(Some(Arc::new(export))),
        }
    }

    fn name(&self) -> &str {
        "export"
    }

    async fn loaded(&self) -> Result<Arc<Export>> {
        let mut lock = self.export.lock().await;
        if let Some(e) = lock.as_ref() {
            return Ok(e.clone());
        }
        let path = self
            .path
            .clone()
            .ok_or_else(|| SyncError::auth("source", "no export configured"))?;
        let path_display = path.display().to_string();
        let export = tokio::task::spawn_blocking(move || -> Result<Export> {
            let s = std::fs::read_to_string(&path)?;
            Export::from_json(&s)
        })
        .await?
        .map_err(|e| SyncError::auth("source", format!("{}: {}", path_display, e)))?;
        info!(
            "Loaded source export {} ({} playlists, {} library songs)",
            path_display,
            export.playlists.len(),
            export.library.len()
        );
        let export = Arc::new(export);
        *lock = Some(export.clone());
        Ok(export)
    }
}

#[async_trait]
impl SourceCatalog for ExportSource {
    fn name(&self) -> &str {
        ExportSource::name(self)
    }

    async fn authenticate(&self) -> Result<()> {
        self.loaded().await.map(|_| ())
    }

    async fn list_playlists(&self) -> Result<Vec<SourcePlaylist>> {
        self.loaded().await?.source_playlists()
    }

    async fn get_track_info(&self, catalog_id: &str) -> Result<TrackInfo> {
        debug!("store lookup {}", catalog_id);
        self.loaded()
            .await?
            .store
            .get(catalog_id)
            .cloned()
            .ok_or_else(|| {
                SyncError::Lookup {
                    catalog_id: catalog_id.to_string(),
                }
                .into()
            })
    }

    async fn get_library_index(&self) -> Result<LibraryIndex> {
        Ok(self.loaded().await?.library_index())
    }
}
