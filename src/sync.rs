//! Run-level orchestration: playlist selection, per-playlist pipelines and the
//! final report.
use crate::api::{Destination, SourceCatalog};
use crate::config::SyncConfig;
use crate::error::{is_auth_error, SyncError};
use crate::merge::merge_playlist;
use crate::models::{partition_resolutions, DestinationPlaylist, LibraryIndex, SourcePlaylist};
use crate::resolve::{eligible_entries, resolve_all, TrackResolver};
use crate::retry::CallPolicy;
use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaylistStatus {
    Created,
    Updated,
    Failed { error: String },
    SkippedDuplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: PlaylistStatus,
    pub eligible: usize,
    pub found: usize,
    pub appended: usize,
    pub not_found: Vec<String>,
}

impl PlaylistOutcome {
    fn empty(name: &str, status: PlaylistStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            eligible: 0,
            found: 0,
            appended: 0,
            not_found: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PlaylistStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub playlists: Vec<PlaylistOutcome>,
}

impl SyncReport {
    pub fn get(&self, name: &str) -> Option<&PlaylistOutcome> {
        self.playlists.iter().find(|p| p.name == name)
    }

    pub fn failed_count(&self) -> usize {
        self.playlists.iter().filter(|p| p.is_failed()).count()
    }

    pub fn total_appended(&self) -> usize {
        self.playlists.iter().map(|p| p.appended).sum()
    }

    /// "<playlist>: <label>" for every unresolved track across the run.
    pub fn not_found_labels(&self) -> Vec<String> {
        self.playlists
            .iter()
            .flat_map(|p| p.not_found.iter().map(move |l| format!("{}: {}", p.name, l)))
            .collect()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s).with_context(|| format!("writing report to {}", path.display()))?;
        Ok(())
    }
}

pub const EXIT_AUTH_FAILED: i32 = 1;
pub const EXIT_SYNC_FAILED: i32 = 2;

/// Process exit status for a run: 1 when a service rejected our credentials,
/// 2 when the run or any playlist failed for another reason.
pub fn exit_code(result: &Result<SyncReport>) -> i32 {
    match result {
        Ok(report) if report.failed_count() == 0 => 0,
        Ok(_) => EXIT_SYNC_FAILED,
        Err(e) if is_auth_error(e) => EXIT_AUTH_FAILED,
        Err(_) => EXIT_SYNC_FAILED,
    }
}

/// Playlists to sync this run, plus names skipped because an earlier playlist
/// already claimed them.
pub fn select_playlists<'a>(
    playlists: &'a [SourcePlaylist],
    cfg: &SyncConfig,
) -> (Vec<&'a SourcePlaylist>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    let mut duplicates = Vec::new();
    for p in playlists {
        if let Some(filter) = &cfg.name_filter {
            if !filter.contains(&p.name) {
                continue;
            }
        }
        if cfg.exclude.contains(&p.name) || p.last_modified_at <= cfg.since {
            continue;
        }
        if seen.insert(p.name.as_str()) {
            selected.push(p);
        } else {
            duplicates.push(p.name.clone());
        }
    }
    (selected, duplicates)
}

/// Authenticate both services. Any failure here is reported as
/// `SyncError::Authentication` for the service that failed.
pub async fn login(source: &dyn SourceCatalog, destination: &dyn Destination) -> Result<()> {
    source.authenticate().await.map_err(|e| {
        if is_auth_error(&e) {
            e
        } else {
            SyncError::auth(source.name(), format!("{:#}", e)).into()
        }
    })?;
    destination.authenticate().await.map_err(|e| {
        if is_auth_error(&e) {
            e
        } else {
            SyncError::auth(destination.name(), format!("{:#}", e)).into()
        }
    })?;
    info!("Logged in to {} and {}", source.name(), destination.name());
    Ok(())
}

struct PlaylistSync<'a> {
    resolver: TrackResolver<'a>,
    destination: &'a dyn Destination,
    policy: &'a CallPolicy,
    cfg: &'a SyncConfig,
}

impl PlaylistSync<'_> {
    async fn run(
        &self,
        playlist: &SourcePlaylist,
        existing: Option<&DestinationPlaylist>,
    ) -> Result<PlaylistOutcome> {
        let eligible = eligible_entries(&playlist.entries, self.cfg.since).count();
        let results = resolve_all(&self.resolver, &playlist.entries, self.cfg.since).await?;
        let (found, not_found) = partition_resolutions(results);
        for nf in &not_found {
            warn!("Track not found for '{}': '{}'", playlist.name, nf);
        }

        let merged = merge_playlist(
            self.destination,
            self.policy,
            existing,
            &playlist.name,
            &found,
            self.cfg.batch_size,
        )
        .await?;

        let status = if merged.created {
            PlaylistStatus::Created
        } else {
            PlaylistStatus::Updated
        };
        info!(
            "{} playlist '{}': added {} new tracks ({} resolved, {} not found)",
            if merged.created { "Created" } else { "Updated" },
            playlist.name,
            merged.appended,
            found.len(),
            not_found.len()
        );
        Ok(PlaylistOutcome {
            name: playlist.name.clone(),
            status,
            eligible,
            found: found.len(),
            appended: merged.appended,
            not_found,
        })
    }
}

/// Sync every selected playlist concurrently. Per-playlist failures are
/// recorded in the report; only failures that prevent any playlist from
/// running (library or destination listing) are returned as errors.
pub async fn run_sync(
    source: &dyn SourceCatalog,
    destination: &dyn Destination,
    playlists: &[SourcePlaylist],
    cfg: &SyncConfig,
    policy: &CallPolicy,
) -> Result<SyncReport> {
    let (selected, duplicates) = select_playlists(playlists, cfg);
    let mut report = SyncReport::default();
    for name in duplicates {
        warn!("Skipping duplicate source playlist '{}'", name);
        report
            .playlists
            .push(PlaylistOutcome::empty(&name, PlaylistStatus::SkippedDuplicate));
    }
    if selected.is_empty() {
        info!("No playlists changed since {}", cfg.since);
        return Ok(report);
    }
    info!("Syncing {} playlist(s)", selected.len());

    let library: LibraryIndex = policy
        .run("fetch library index", || source.get_library_index())
        .await
        .context("fetching source library")?;

    let mut existing: HashMap<String, DestinationPlaylist> = HashMap::new();
    for p in policy
        .run("list destination playlists", || destination.list_playlists())
        .await
        .context("listing destination playlists")?
    {
        existing.entry(p.name.clone()).or_insert(p);
    }

    let syncer = PlaylistSync {
        resolver: TrackResolver::new(source, destination, &library, &cfg.store_id_prefix, policy),
        destination,
        policy,
        cfg,
    };

    let outcomes = join_all(selected.into_iter().map(|p| {
        let syncer = &syncer;
        let existing = existing.get(&p.name);
        async move {
            match syncer.run(p, existing).await {
                Ok(o) => o,
                Err(e) => {
                    error!("Sync of playlist '{}' failed: {:#}", p.name, e);
                    PlaylistOutcome::empty(&p.name, PlaylistStatus::Failed { error: format!("{:#}", e) })
                }
            }
        }
    }))
    .await;
    report.playlists.extend(outcomes);
    Ok(report)
}

/// Full run: log in, snapshot the source playlists, sync.
pub async fn migrate(
    source: &dyn SourceCatalog,
    destination: &dyn Destination,
    cfg: &SyncConfig,
    policy: &CallPolicy,
) -> Result<SyncReport> {
    login(source, destination).await?;
    info!("Retrieving {} playlists", source.name());
    let playlists = policy
        .run("list source playlists", || source.list_playlists())
        .await
        .context("listing source playlists")?;
    run_sync(source, destination, &playlists, cfg, policy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn playlist(name: &str, modified: i64) -> SourcePlaylist {
        SourcePlaylist {
            name: name.into(),
            created_at: 0,
            last_modified_at: modified,
            entries: Vec::new(),
        }
    }

    #[test]
    fn selection_applies_filters_and_watermark() {
        let cfg = Config::from_toml(
            r#"
since = 100
exclude = ["Skip"]
"#,
        )
        .unwrap()
        .sync_config(&[]);
        let pls = vec![
            playlist("A", 150),
            playlist("Old", 100),
            playlist("Skip", 500),
            playlist("A", 200),
            playlist("B", 101),
        ];
        let (selected, dups) = select_playlists(&pls, &cfg);
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(dups, vec!["A".to_string()]);

        let only_b = Config::default().sync_config(&["B".to_string()]);
        let (selected, _) = select_playlists(&pls, &only_b);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "B");
    }

    #[test]
    fn report_serializes_status_inline() {
        let report = SyncReport {
            playlists: vec![PlaylistOutcome::empty(
                "X",
                PlaylistStatus::Failed { error: "boom".into() },
            )],
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["playlists"][0]["status"], "failed");
        assert_eq!(v["playlists"][0]["error"], "boom");
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn exit_codes_separate_auth_from_sync_failures() {
        assert_eq!(exit_code(&Ok(SyncReport::default())), 0);
        let failed = SyncReport {
            playlists: vec![PlaylistOutcome::empty("X", PlaylistStatus::Failed { error: "e".into() })],
        };
        assert_eq!(exit_code(&Ok(failed)), EXIT_SYNC_FAILED);
        let auth: Result<SyncReport> = Err(SyncError::auth("spotify", "no token").into());
        assert_eq!(exit_code(&auth), EXIT_AUTH_FAILED);
        let listing: Result<SyncReport> =
            Err(anyhow::anyhow!("503").context("listing destination playlists"));
        assert_eq!(exit_code(&listing), EXIT_SYNC_FAILED);
    }
}
