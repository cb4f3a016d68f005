pub mod export;
pub mod mock;
pub mod spotify;

use crate::models::{DestinationPlaylist, LibraryIndex, SourcePlaylist, TrackInfo};
use anyhow::Result;

/// Source catalog: the service playlists are migrated from.
/// Implementations: export::ExportSource.
#[async_trait::async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Log in / open the catalog. Failures must carry `SyncError::Authentication`.
    async fn authenticate(&self) -> Result<()>;

    /// Snapshot of every playlist with its entries.
    async fn list_playlists(&self) -> Result<Vec<SourcePlaylist>>;

    /// Store catalog lookup for a store-prefixed track id.
    async fn get_track_info(&self, catalog_id: &str) -> Result<TrackInfo>;

    /// Personal library: catalog id -> metadata.
    async fn get_library_index(&self) -> Result<LibraryIndex>;

    fn name(&self) -> &str;
}

/// Destination catalog: the service playlists are migrated to.
/// Implementations: spotify::SpotifyProvider, mock::MockDestination.
#[async_trait::async_trait]
pub trait Destination: Send + Sync {
    /// Verify credentials. Failures must carry `SyncError::Authentication`.
    async fn authenticate(&self) -> Result<()>;

    /// Search by title and artist. Track ids in the service's relevance order, possibly empty.
    async fn search_tracks(&self, title: &str, artist: &str) -> Result<Vec<String>>;

    /// All playlists owned by the current user.
    async fn list_playlists(&self) -> Result<Vec<DestinationPlaylist>>;

    /// Create an empty playlist.
    async fn create_playlist(&self, name: &str) -> Result<DestinationPlaylist>;

    /// Current track ids of a playlist, de-duplicated, in playlist order.
    async fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<String>>;

    /// Append track ids (batching done by caller, at most `max_append_batch()` ids).
    async fn append_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    /// Largest number of ids a single append call accepts.
    fn max_append_batch(&self) -> usize {
        crate::config::MAX_APPEND_BATCH
    }

    /// Return the provider's name (for logging, reports, etc)
    fn name(&self) -> &str;
}
