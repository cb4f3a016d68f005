use crate::api::Destination;
use crate::models::DestinationPlaylist;
use crate::retry::CallPolicy;
use anyhow::{Context, Result};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub playlist_id: String,
    pub created: bool,
    pub appended: usize,
}

/// `resolved - current`, without repeats, in first-seen order of `resolved`.
pub fn new_track_ids(resolved: &[String], current: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = current.iter().map(String::as_str).collect();
    resolved
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Split ids into consecutive batches of at most `batch_size` (>= 1).
pub fn batches(ids: &[String], batch_size: usize) -> std::slice::Chunks<'_, String> {
    ids.chunks(batch_size.max(1))
}

/// Create `name`, or on a retry first look for a playlist an earlier attempt
/// may have created before failing.
async fn create_once(
    destination: &dyn Destination,
    policy: &CallPolicy,
    name: &str,
) -> Result<DestinationPlaylist> {
    policy
        .run_attempts("create playlist", |attempt| async move {
            if attempt > 1 {
                let listed = destination.list_playlists().await?;
                if let Some(p) = listed.into_iter().find(|p| p.name == name) {
                    debug!("'{}' already exists after a failed create, reusing it", name);
                    return Ok(p);
                }
            }
            destination.create_playlist(name).await
        })
        .await
}

/// Append one batch. A retry re-reads the playlist and sends only the ids an
/// earlier attempt did not commit.
async fn append_once(
    destination: &dyn Destination,
    policy: &CallPolicy,
    playlist_id: &str,
    batch: &[String],
) -> Result<()> {
    policy
        .run_attempts("append tracks", |attempt| async move {
            if attempt == 1 {
                return destination.append_tracks(playlist_id, batch).await;
            }
            let current = destination.get_playlist_tracks(playlist_id).await?;
            let pending = new_track_ids(batch, &current);
            if pending.is_empty() {
                debug!("batch for {} already committed", playlist_id);
                return Ok(());
            }
            destination.append_tracks(playlist_id, &pending).await
        })
        .await
}

/// Append-only merge of `resolved` into the destination playlist named `name`.
/// The playlist is created when `existing` is `None`. The current track set is
/// always fetched fresh, so re-running with the same input appends nothing.
pub async fn merge_playlist(
    destination: &dyn Destination,
    policy: &CallPolicy,
    existing: Option<&DestinationPlaylist>,
    name: &str,
    resolved: &[String],
    batch_size: usize,
) -> Result<MergeOutcome> {
    let (playlist, created) = match existing {
        Some(p) => (p.clone(), false),
        None => {
            info!("Creating playlist '{}'", name);
            let p = create_once(destination, policy, name)
                .await
                .with_context(|| format!("creating playlist '{}'", name))?;
            (p, true)
        }
    };

    let current = policy
        .run("fetch playlist tracks", || destination.get_playlist_tracks(&playlist.id))
        .await
        .with_context(|| format!("fetching tracks of '{}'", name))?;

    let new_ids = new_track_ids(resolved, &current);
    debug!(
        "'{}': {} resolved, {} already present, {} new",
        name,
        resolved.len(),
        current.len(),
        new_ids.len()
    );

    let batch_size = batch_size.min(destination.max_append_batch()).max(1);
    let mut appended = 0usize;
    for (i, batch) in batches(&new_ids, batch_size).enumerate() {
        append_once(destination, policy, &playlist.id, batch)
            .await
            .with_context(|| {
                format!(
                    "appending batch {} to '{}' ({} tracks already appended)",
                    i + 1,
                    name,
                    appended
                )
            })?;
        appended += batch.len();
    }

    Ok(MergeOutcome {
        playlist_id: playlist.id,
        created,
        appended,
    })
}
