//! Source track -> destination track id resolution.
use crate::api::{Destination, SourceCatalog};
use crate::error::SyncError;
use crate::models::{LibraryIndex, PlaylistEntry, Resolution, SourceTrack, TrackInfo};
use crate::normalize::normalize;
use crate::retry::CallPolicy;
use anyhow::Result;
use futures::future::join_all;
use tracing::debug;

/// Resolves source tracks against the destination search. At most two search
/// queries per track: the exact metadata, then the normalized metadata.
pub struct TrackResolver<'a> {
    source: &'a dyn SourceCatalog,
    destination: &'a dyn Destination,
    library: &'a LibraryIndex,
    store_id_prefix: &'a str,
    policy: &'a CallPolicy,
}

impl<'a> TrackResolver<'a> {
    pub fn new(
        source: &'a dyn SourceCatalog,
        destination: &'a dyn Destination,
        library: &'a LibraryIndex,
        store_id_prefix: &'a str,
        policy: &'a CallPolicy,
    ) -> Self {
        Self {
            source,
            destination,
            library,
            store_id_prefix,
            policy,
        }
    }

    /// Display metadata for a track: inline, store lookup, or library index.
    pub async fn track_info(&self, track: &SourceTrack) -> Result<TrackInfo> {
        match track {
            SourceTrack::Inline { title, artist } => Ok(TrackInfo::new(title.clone(), artist.clone())),
            SourceTrack::Catalog { catalog_id } if catalog_id.starts_with(self.store_id_prefix) => {
                self.policy
                    .run("store lookup", || self.source.get_track_info(catalog_id))
                    .await
            }
            SourceTrack::Catalog { catalog_id } => self
                .library
                .get(catalog_id)
                .cloned()
                .ok_or_else(|| {
                    SyncError::Lookup {
                        catalog_id: catalog_id.clone(),
                    }
                    .into()
                }),
        }
    }

    async fn first_match(&self, title: &str, artist: &str) -> Result<Option<String>> {
        let ids = self
            .policy
            .run("search", || self.destination.search_tracks(title, artist))
            .await?;
        Ok(ids.into_iter().next())
    }

    pub async fn resolve(&self, track: &SourceTrack) -> Result<Resolution> {
        let info = self.track_info(track).await?;
        if let Some(id) = self.first_match(&info.title, &info.artist).await? {
            return Ok(Resolution::Found(id));
        }
        let (title, artist) = normalize(&info.title, &info.artist);
        debug!("no exact match for '{} - {}', retrying as '{} - {}'", info.title, info.artist, title, artist);
        if let Some(id) = self.first_match(&title, &artist).await? {
            return Ok(Resolution::Found(id));
        }
        Ok(Resolution::NotFound(format!("{} - {}", title, artist)))
    }
}

/// Entries created after the watermark.
pub fn eligible_entries(entries: &[PlaylistEntry], since: i64) -> impl Iterator<Item = &PlaylistEntry> {
    entries.iter().filter(move |e| e.created_at > since)
}

/// Resolve every eligible entry concurrently and wait for all of them. The
/// result order is unspecified. Any failure (missing library entry, exhausted
/// retries) fails the whole call once every resolution has finished.
pub async fn resolve_all(
    resolver: &TrackResolver<'_>,
    entries: &[PlaylistEntry],
    since: i64,
) -> Result<Vec<Resolution>> {
    let tasks = eligible_entries(entries, since).map(|e| resolver.resolve(&e.track));
    join_all(tasks).await.into_iter().collect()
}
