use super::Destination;
use crate::config::MAX_APPEND_BATCH;
use crate::db;
use crate::error::SyncError;
use crate::models::DestinationPlaylist;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: i64, // epoch seconds
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Spotify destination backed by the Spotify Web API.
/// Token management reads token JSON from DB and persists refreshed tokens.
/// Endpoints may be overridden by SPOTIFY_AUTH_BASE and SPOTIFY_API_BASE env vars
/// or `with_base_urls` (useful for tests).
pub struct SpotifyProvider {
    client: Client,
    client_id: String,
    client_secret: String,
    db_path: std::path::PathBuf,
    api_base: String,
    auth_base: String,
    token: tokio::sync::Mutex<Option<StoredToken>>,
    user_id: tokio::sync::Mutex<Option<String>>,
}

impl SpotifyProvider {
    pub fn new(client_id: String, client_secret: String, db_path: std::path::PathBuf) -> Self {
        // If either client_id or client_secret is empty, try to load from DB
        let (client_id, client_secret) = if client_id.is_empty() || client_secret.is_empty() {
            match rusqlite::Connection::open(&db_path)
                .map_err(anyhow::Error::from)
                .and_then(|conn| db::load_credential_with_client(&conn, "spotify"))
            {
                Ok(Some((_token_json, db_client_id, db_client_secret))) => (
                    db_client_id.unwrap_or(client_id),
                    db_client_secret.unwrap_or(client_secret),
                ),
                _ => (client_id, client_secret),
            }
        } else {
            (client_id, client_secret)
        };
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            db_path,
            api_base: env::var("SPOTIFY_API_BASE")
                .unwrap_or_else(|_| "https://api.spotify.com/v1".into()),
            auth_base: env::var("SPOTIFY_AUTH_BASE")
                .unwrap_or_else(|_| "https://accounts.spotify.com".into()),
            token: tokio::sync::Mutex::new(None),
            user_id: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_base_urls(mut self, api_base: &str, auth_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self
    }

    /// Use a fixed user id instead of asking /me.
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        if let Some(u) = user_id.filter(|u| !u.trim().is_empty()) {
            self.user_id = tokio::sync::Mutex::new(Some(u));
        }
        self
    }

    fn name(&self) -> &str {
        "spotify"
    }

    async fn load_token_from_db(&self) -> Result<Option<StoredToken>> {
        let db_path = self.db_path.clone();
        let json_opt =
            tokio::task::spawn_blocking(move || -> Result<Option<String>, anyhow::Error> {
                let conn = db::open_or_create(&db_path)?;
                Ok(db::load_credential_with_client(&conn, "spotify")?.map(|(json, _, _)| json))
            })
            .await??;

        if let Some(s) = json_opt {
            let st: StoredToken =
                serde_json::from_str(&s).map_err(|e| anyhow!("parse token json: {}", e))?;
            Ok(Some(st))
        } else {
            Ok(None)
        }
    }

    async fn persist_token_to_db(&self, st: &StoredToken) -> Result<()> {
        let db_path = self.db_path.clone();
        let s = serde_json::to_string(&st)?;
        let client_id = Some(self.client_id.clone()).filter(|c| !c.is_empty());
        let client_secret = Some(self.client_secret.clone()).filter(|c| !c.is_empty());
        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            let conn = db::open_or_create(&db_path)?;
            db::save_credential_raw(&conn, "spotify", &s, client_id.as_deref(), client_secret.as_deref())?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Load the token if needed and refresh it when it is near expiry (or when `force` is set).
    async fn ensure_token(&self, force: bool) -> Result<()> {
        let mut lock = self.token.lock().await;
        if lock.is_none() {
            match self.load_token_from_db().await? {
                Some(st) => *lock = Some(st),
                None => return Err(SyncError::auth("spotify", "no stored token; import one first").into()),
            }
        }
        if let Some(st) = &*lock {
            let now = Utc::now().timestamp();
            if force || now + 30 >= st.expires_at {
                debug!("Spotify token is near expiry, refreshing");
                let mut cur = st.clone();
                self.refresh_token_internal(&mut cur).await?;
                *lock = Some(cur);
            }
        }
        Ok(())
    }

    async fn refresh_token_internal(&self, cur: &mut StoredToken) -> Result<()> {
        let refresh_token = cur
            .refresh_token
            .clone()
            .ok_or_else(|| SyncError::auth("spotify", "token expired and no refresh token"))?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
        ];
        let auth_header = format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
        );
        let url = format!("{}/api/token", self.auth_base);
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, auth_header)
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(anyhow!("Failed to refresh token: {} - {}", status, body));
            }
            return Err(SyncError::auth(
                "spotify",
                format!("Failed to refresh token: {} - {}", status, body),
            )
            .into());
        }
        let j: serde_json::Value = resp.json().await?;
        let access_token = j["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("no access_token"))?
            .to_string();
        let expires_in = j["expires_in"].as_i64().unwrap_or(3600);
        cur.access_token = access_token;
        cur.token_type = "Bearer".into();
        cur.expires_at = Utc::now().timestamp() + expires_in;
        if let Some(s) = j["scope"].as_str() {
            cur.scope = Some(s.to_string());
        }
        // Spotify may rotate the refresh token.
        if let Some(r) = j["refresh_token"].as_str() {
            cur.refresh_token = Some(r.to_string());
        }
        self.persist_token_to_db(cur).await?;
        Ok(())
    }

    pub async fn get_bearer(&self) -> Result<String> {
        self.ensure_token(false).await?;
        let lock = self.token.lock().await;
        let st = lock.as_ref().ok_or_else(|| anyhow!("no token loaded"))?;
        Ok(format!("Bearer {}", st.access_token))
    }

    /// Send an authorized request. A 401 triggers one forced token refresh and
    /// a retry; a second 401 is an authentication failure. 429 becomes
    /// `SyncError::RateLimited`.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let bearer = self.get_bearer().await?;
        let mut resp = build().header(AUTHORIZATION, &bearer).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Got 401 from Spotify; attempting token refresh");
            self.ensure_token(true).await?;
            let bearer2 = self.get_bearer().await?;
            resp = build().header(AUTHORIZATION, &bearer2).send().await?;
            if resp.status() == StatusCode::UNAUTHORIZED {
                return Err(SyncError::auth("spotify", "request unauthorized after token refresh").into());
            }
        }
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(SyncError::RateLimited { retry_after }.into());
        }
        Ok(resp)
    }

    async fn get_json(&self, url: &str, what: &str) -> Result<serde_json::Value> {
        let resp = self
            .send(|| self.client.get(url).header(ACCEPT, "application/json"))
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed: {} => {}", what, status, txt));
        }
        Ok(resp.json().await?)
    }

    async fn get_user_id(&self) -> Result<String> {
        {
            let g = self.user_id.lock().await;
            if let Some(u) = g.as_ref() {
                return Ok(u.clone());
            }
        }
        let j = self.get_json(&format!("{}/me", self.api_base), "fetch /me").await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| anyhow!("no id"))?
            .to_string();
        let mut g = self.user_id.lock().await;
        *g = Some(id.clone());
        Ok(id)
    }

    fn user_url(&self, user_id: &str, rest: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.api_base,
            url::form_urlencoded::byte_serialize(user_id.as_bytes()).collect::<String>(),
            rest
        )
    }
}

#[async_trait]
impl Destination for SpotifyProvider {
    fn name(&self) -> &str {
        SpotifyProvider::name(self)
    }

    fn max_append_batch(&self) -> usize {
        MAX_APPEND_BATCH
    }

    async fn authenticate(&self) -> Result<()> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(SyncError::auth("spotify", "missing client_id/client_secret").into());
        }
        self.get_bearer().await?;
        let user = self.get_user_id().await?;
        debug!("Authenticated with Spotify as {}", user);
        Ok(())
    }

    async fn search_tracks(&self, title: &str, artist: &str) -> Result<Vec<String>> {
        let q = format!("track:{} artist:{}", title, artist);
        let url = format!(
            "{}/search?q={}&type=track&limit=5",
            self.api_base,
            urlencoding::encode(&q)
        );
        let j = self.get_json(&url, "search").await?;
        Ok(j["tracks"]["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|it| it["id"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_playlists(&self) -> Result<Vec<DestinationPlaylist>> {
        let user_id = self.get_user_id().await?;
        let mut playlists = Vec::new();
        let mut next_url = Some(self.user_url(&user_id, "playlists?limit=50"));
        while let Some(url) = next_url {
            let j = self.get_json(&url, "list playlists").await?;
            if let Some(items) = j["items"].as_array() {
                for pl in items {
                    let (Some(id), Some(name)) = (pl["id"].as_str(), pl["name"].as_str()) else {
                        continue;
                    };
                    playlists.push(DestinationPlaylist {
                        id: id.to_string(),
                        name: name.to_string(),
                    });
                }
            }
            next_url = j["next"].as_str().map(|s| s.to_string());
        }
        Ok(playlists)
    }

    async fn create_playlist(&self, name: &str) -> Result<DestinationPlaylist> {
        let user_id = self.get_user_id().await?;
        let url = self.user_url(&user_id, "playlists");
        let body = json!({
            "name": name,
            "public": false
        });
        let resp = self
            .send(|| {
                self.client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .json(&body)
            })
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("create playlist failed: {} => {}", status, txt));
        }
        let j: serde_json::Value = resp.json().await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| anyhow!("no id"))?
            .to_string();
        Ok(DestinationPlaylist {
            id,
            name: name.to_string(),
        })
    }

    async fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut next: Option<String> = Some(format!(
            "{}/playlists/{}/tracks?fields=items(track(id)),next&limit=100",
            self.api_base, playlist_id
        ));

        while let Some(url) = next {
            let j = self.get_json(&url, "list playlist tracks").await?;
            if let Some(items) = j["items"].as_array() {
                for it in items {
                    // local files and removed tracks carry a null id
                    if let Some(id) = it["track"]["id"].as_str() {
                        ids.push(id.to_string());
                    }
                }
            }
            next = j["next"].as_str().map(|s| s.to_string());
        }

        // Deduplicate while preserving order.
        let mut seen = std::collections::HashSet::new();
        ids.retain(|u| seen.insert(u.clone()));
        Ok(ids)
    }

    async fn append_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.len() > MAX_APPEND_BATCH {
            return Err(anyhow!(
                "append of {} tracks exceeds Spotify limit of {}",
                track_ids.len(),
                MAX_APPEND_BATCH
            ));
        }
        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        let uris: Vec<String> = track_ids.iter().map(|id| format!("spotify:track:{}", id)).collect();
        let body = json!({ "uris": uris });
        let resp = self
            .send(|| self.client.post(&url).json(&body))
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("add tracks failed: {} => {}", status, txt));
        }
        Ok(())
    }
}
