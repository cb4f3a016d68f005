use super::Destination;
use crate::config::MAX_APPEND_BATCH;
use crate::error::SyncError;
use crate::models::DestinationPlaylist;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
struct State {
    playlists: Vec<(DestinationPlaylist, Vec<String>)>,
    catalog: HashMap<(String, String), Vec<String>>,
    searches: Vec<(String, String)>,
    appends: Vec<(String, Vec<String>)>,
    created: Vec<String>,
    failing_appends: HashSet<usize>,
    lost_append_acks: HashSet<usize>,
    lost_create_acks: usize,
    failing_lists: usize,
    next_id: usize,
}

/// In-memory destination used in tests. Search answers come from a fixed
/// catalog keyed by exact (title, artist); every call is recorded.
pub struct MockDestination {
    state: Mutex<State>,
    authenticated: bool,
    max_batch: usize,
}

impl MockDestination {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            authenticated: true,
            max_batch: MAX_APPEND_BATCH,
        }
    }

    /// A destination whose `authenticate` always fails.
    pub fn unauthenticated() -> Self {
        Self {
            state: Mutex::new(State::default()),
            authenticated: false,
            max_batch: MAX_APPEND_BATCH,
        }
    }

    /// Report a different per-call append limit.
    pub fn with_max_append_batch(mut self, n: usize) -> Self {
        self.max_batch = n;
        self
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register search results for an exact (title, artist) query.
    pub fn add_catalog_track(&self, title: &str, artist: &str, ids: &[&str]) {
        self.state().catalog.insert(
            (title.to_string(), artist.to_string()),
            ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Seed an existing playlist and return its id.
    pub fn add_playlist(&self, name: &str, track_ids: &[&str]) -> String {
        let mut st = self.state();
        st.next_id += 1;
        let id = format!("mock-playlist-{}", st.next_id);
        st.playlists.push((
            DestinationPlaylist { id: id.clone(), name: name.to_string() },
            track_ids.iter().map(|s| s.to_string()).collect(),
        ));
        id
    }

    /// Make the n-th append call (0-based, counted over the mock's lifetime) fail once.
    pub fn fail_append_call(&self, n: usize) {
        self.state().failing_appends.insert(n);
    }

    /// The n-th append call (0-based) is applied, then reported as failed.
    pub fn lose_append_ack(&self, n: usize) {
        self.state().lost_append_acks.insert(n);
    }

    /// The next `n` create calls make the playlist, then report failure.
    pub fn lose_create_acks(&self, n: usize) {
        self.state().lost_create_acks = n;
    }

    /// The next `n` playlist listings fail.
    pub fn fail_list_playlists(&self, n: usize) {
        self.state().failing_lists = n;
    }

    pub fn playlist_tracks_by_name(&self, name: &str) -> Option<Vec<String>> {
        self.state()
            .playlists
            .iter()
            .find(|(p, _)| p.name == name)
            .map(|(_, t)| t.clone())
    }

    pub fn playlist_count(&self, name: &str) -> usize {
        self.state().playlists.iter().filter(|(p, _)| p.name == name).count()
    }

    pub fn searches(&self) -> Vec<(String, String)> {
        self.state().searches.clone()
    }

    pub fn appends(&self) -> Vec<(String, Vec<String>)> {
        self.state().appends.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }
}

#[async_trait]
impl Destination for MockDestination {
    fn name(&self) -> &str {
        MockDestination::name(self)
    }

    async fn authenticate(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(SyncError::auth("mock", "invalid credentials").into())
        }
    }

    async fn search_tracks(&self, title: &str, artist: &str) -> Result<Vec<String>> {
        info!("MockDestination: search {} - {}", title, artist);
        let mut st = self.state();
        st.searches.push((title.to_string(), artist.to_string()));
        Ok(st
            .catalog
            .get(&(title.to_string(), artist.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn max_append_batch(&self) -> usize {
        self.max_batch
    }

    async fn list_playlists(&self) -> Result<Vec<DestinationPlaylist>> {
        let mut st = self.state();
        if st.failing_lists > 0 {
            st.failing_lists -= 1;
            return Err(anyhow!("list playlists failed: 503 Service Unavailable"));
        }
        Ok(st.playlists.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn create_playlist(&self, name: &str) -> Result<DestinationPlaylist> {
        info!("MockDestination: create_playlist {}", name);
        let id = self.add_playlist(name, &[]);
        let mut st = self.state();
        st.created.push(name.to_string());
        if st.lost_create_acks > 0 {
            st.lost_create_acks -= 1;
            return Err(anyhow!("connection reset after creating {}", id));
        }
        Ok(DestinationPlaylist { id, name: name.to_string() })
    }

    async fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<String>> {
        self.state()
            .playlists
            .iter()
            .find(|(p, _)| p.id == playlist_id)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| anyhow!("no playlist {}", playlist_id))
    }

    async fn append_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        info!("MockDestination: append_tracks {} -> {} tracks", playlist_id, track_ids.len());
        let mut st = self.state();
        let call = st.appends.len();
        st.appends.push((playlist_id.to_string(), track_ids.to_vec()));
        if st.failing_appends.remove(&call) {
            return Err(anyhow!("append call {} failed", call));
        }
        let entry = st
            .playlists
            .iter_mut()
            .find(|(p, _)| p.id == playlist_id)
            .ok_or_else(|| anyhow!("no playlist {}", playlist_id))?;
        entry.1.extend(track_ids.iter().cloned());
        if st.lost_append_acks.remove(&call) {
            return Err(anyhow!("connection reset after append call {}", call));
        }
        Ok(())
    }
}
