use playlist_migrate::api::export::{Export, ExportSource};
use playlist_migrate::api::mock::MockDestination;
use playlist_migrate::config::{Config, SyncConfig};
use playlist_migrate::error::is_auth_error;
use playlist_migrate::retry::CallPolicy;
use playlist_migrate::sync::{exit_code, migrate, PlaylistStatus, EXIT_SYNC_FAILED};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

fn policy(retries: u32) -> CallPolicy {
    CallPolicy::new(retries, Duration::ZERO, Duration::from_secs(5), 8)
}

fn sync_cfg(since: i64) -> SyncConfig {
    let mut cfg = Config::default();
    cfg.since = since;
    cfg.sync_config(&[])
}

fn road_trip_export() -> Export {
    let v = json!({
        "playlists": [{
            "name": "Road Trip",
            "creationTimestamp": "100",
            "lastModifiedTimestamp": "500",
            "tracks": [
                {"creationTimestamp": "50", "title": "Already Synced", "artist": "Old"},
                {"creationTimestamp": "200", "title": "Song A", "artist": "Artist A"},
                {"creationTimestamp": "300", "trackId": "Tstore1"},
                {"creationTimestamp": "400", "trackId": "lib-1"}
            ]
        }],
        "library": [{"id": "lib-1", "title": "Song (feat. X)", "artist": "Artist C"}],
        "store": {"Tstore1": {"title": "Song B", "artist": "Artist B"}}
    });
    Export::from_json(&v.to_string()).unwrap()
}

fn road_trip_destination() -> MockDestination {
    let dest = MockDestination::new();
    dest.add_catalog_track("Song A", "Artist A", &["sp-a", "sp-a-alt"]);
    dest.add_catalog_track("Song B", "Artist B", &["sp-b"]);
    dest.add_catalog_track("Song ", "Artist C", &["sp-c"]);
    dest.add_catalog_track("Already Synced", "Old", &["sp-old"]);
    dest
}

#[tokio::test]
async fn road_trip_created_then_idempotent() {
    let source = ExportSource::from_export(road_trip_export());
    let dest = road_trip_destination();
    let cfg = sync_cfg(100);
    let p = policy(1);

    let report = migrate(&source, &dest, &cfg, &p).await.unwrap();
    let rt = report.get("Road Trip").unwrap();
    assert_eq!(rt.status, PlaylistStatus::Created);
    assert_eq!(rt.eligible, 3);
    assert_eq!(rt.found + rt.not_found.len(), rt.eligible);
    assert_eq!(rt.appended, 3);
    assert!(rt.not_found.is_empty());

    let tracks: HashSet<String> = dest.playlist_tracks_by_name("Road Trip").unwrap().into_iter().collect();
    let expected: HashSet<String> = ["sp-a", "sp-b", "sp-c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(tracks, expected);
    // entry before the watermark is never searched
    assert!(dest.searches().iter().all(|(t, _)| t != "Already Synced"));
    // exact (x3) + one normalized retry
    assert_eq!(dest.searches().len(), 4);

    let second = migrate(&source, &dest, &cfg, &p).await.unwrap();
    let rt = second.get("Road Trip").unwrap();
    assert_eq!(rt.status, PlaylistStatus::Updated);
    assert_eq!(rt.appended, 0);
    assert!(rt.not_found.is_empty());
    assert_eq!(dest.playlist_count("Road Trip"), 1);
    assert_eq!(dest.created(), vec!["Road Trip".to_string()]);
    assert_eq!(dest.playlist_tracks_by_name("Road Trip").unwrap().len(), 3);
}

#[tokio::test]
async fn unresolvable_track_reported_with_normalized_label() {
    let export = Export::from_json(
        &json!({
            "playlists": [{
                "name": "Mix",
                "lastModifiedTimestamp": 10,
                "tracks": [
                    {"creationTimestamp": 5, "title": "Known", "artist": "Band"},
                    {"creationTimestamp": 6, "title": "Ghost (feat. Nobody)", "artist": "Phantom & Co"}
                ]
            }]
        })
        .to_string(),
    )
    .unwrap();
    let source = ExportSource::from_export(export);
    let dest = MockDestination::new();
    dest.add_catalog_track("Known", "Band", &["sp-known"]);

    let report = migrate(&source, &dest, &sync_cfg(0), &policy(1)).await.unwrap();
    let mix = report.get("Mix").unwrap();
    assert_eq!(mix.status, PlaylistStatus::Created);
    assert_eq!(mix.appended, 1);
    assert_eq!(mix.not_found, vec!["Ghost  - Phantom ".to_string()]);
    assert_eq!(report.not_found_labels(), vec!["Mix: Ghost  - Phantom ".to_string()]);
}

#[tokio::test]
async fn existing_playlist_only_gets_missing_tracks() {
    let source = ExportSource::from_export(road_trip_export());
    let dest = road_trip_destination();
    dest.add_playlist("Road Trip", &["sp-b", "manual-edit"]);

    let report = migrate(&source, &dest, &sync_cfg(100), &policy(1)).await.unwrap();
    let rt = report.get("Road Trip").unwrap();
    assert_eq!(rt.status, PlaylistStatus::Updated);
    assert_eq!(rt.appended, 2);

    let tracks = dest.playlist_tracks_by_name("Road Trip").unwrap();
    // pre-merge tracks stay, in place, nothing duplicated
    assert_eq!(&tracks[..2], &["sp-b".to_string(), "manual-edit".to_string()]);
    let unique: HashSet<&String> = tracks.iter().collect();
    assert_eq!(unique.len(), tracks.len());
    assert_eq!(tracks.len(), 4);
}

#[tokio::test]
async fn lookup_failure_is_isolated_to_its_playlist() {
    let export = Export::from_json(
        &json!({
            "playlists": [
                {"name": "Broken", "lastModifiedTimestamp": 10,
                 "tracks": [{"creationTimestamp": 5, "trackId": "lib-missing"},
                            {"creationTimestamp": 5, "title": "Fine", "artist": "Band"}]},
                {"name": "Healthy", "lastModifiedTimestamp": 10,
                 "tracks": [{"creationTimestamp": 5, "title": "Fine", "artist": "Band"}]}
            ]
        })
        .to_string(),
    )
    .unwrap();
    let source = ExportSource::from_export(export);
    let dest = MockDestination::new();
    dest.add_catalog_track("Fine", "Band", &["sp-fine"]);

    let report = migrate(&source, &dest, &sync_cfg(0), &policy(3)).await.unwrap();
    assert_eq!(report.failed_count(), 1);
    match &report.get("Broken").unwrap().status {
        PlaylistStatus::Failed { error } => assert!(error.contains("lib-missing")),
        other => panic!("unexpected status {:?}", other),
    }
    // a failed playlist never reaches the merge step
    assert!(dest.playlist_tracks_by_name("Broken").is_none());
    assert_eq!(report.get("Healthy").unwrap().appended, 1);
}

fn big_export(n: usize) -> Export {
    let tracks: Vec<_> = (0..n)
        .map(|i| json!({"creationTimestamp": 1, "title": format!("Song {}", i), "artist": "Band"}))
        .collect();
    Export::from_json(
        &json!({"playlists": [{"name": "Big", "lastModifiedTimestamp": 1, "tracks": tracks}]}).to_string(),
    )
    .unwrap()
}

fn big_destination(n: usize) -> MockDestination {
    let dest = MockDestination::new();
    for i in 0..n {
        dest.add_catalog_track(&format!("Song {}", i), "Band", &[format!("id-{}", i).as_str()]);
    }
    dest
}

#[tokio::test]
async fn appends_are_batched() {
    let source = ExportSource::from_export(big_export(250));
    let dest = big_destination(250);

    let report = migrate(&source, &dest, &sync_cfg(0), &policy(1)).await.unwrap();
    assert_eq!(report.get("Big").unwrap().appended, 250);

    let appends = dest.appends();
    let sizes: Vec<usize> = appends.iter().map(|(_, ids)| ids.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    let concatenated: Vec<String> = appends.into_iter().flat_map(|(_, ids)| ids).collect();
    assert_eq!(concatenated, dest.playlist_tracks_by_name("Big").unwrap());
}

#[tokio::test]
async fn failed_batch_keeps_earlier_batches_and_rerun_converges() {
    let source = ExportSource::from_export(big_export(250));
    let dest = big_destination(250);
    dest.fail_append_call(1);

    let report = migrate(&source, &dest, &sync_cfg(0), &policy(1)).await.unwrap();
    assert!(report.get("Big").unwrap().is_failed());
    assert_eq!(dest.playlist_tracks_by_name("Big").unwrap().len(), 100);

    let rerun = migrate(&source, &dest, &sync_cfg(0), &policy(1)).await.unwrap();
    let big = rerun.get("Big").unwrap();
    assert_eq!(big.status, PlaylistStatus::Updated);
    assert_eq!(big.appended, 150);
    let tracks = dest.playlist_tracks_by_name("Big").unwrap();
    assert_eq!(tracks.len(), 250);
    assert_eq!(tracks.iter().collect::<HashSet<_>>().len(), 250);
}

#[tokio::test]
async fn transient_append_failure_is_retried() {
    let source = ExportSource::from_export(big_export(5));
    let dest = big_destination(5);
    dest.fail_append_call(0);

    let report = migrate(&source, &dest, &sync_cfg(0), &policy(2)).await.unwrap();
    let big = report.get("Big").unwrap();
    assert_eq!(big.status, PlaylistStatus::Created);
    assert_eq!(big.appended, 5);
    assert_eq!(dest.appends().len(), 2);
}

#[tokio::test]
async fn authentication_failure_aborts_before_any_work() {
    let source = ExportSource::from_export(road_trip_export());
    let dest = MockDestination::unauthenticated();
    let err = migrate(&source, &dest, &sync_cfg(0), &policy(1)).await.unwrap_err();
    assert!(is_auth_error(&err));
    assert!(dest.searches().is_empty());
    assert!(dest.created().is_empty());
}

#[tokio::test]
async fn unchanged_and_excluded_playlists_are_skipped() {
    let source = ExportSource::from_export(road_trip_export());
    let dest = road_trip_destination();

    let report = migrate(&source, &dest, &sync_cfg(500), &policy(1)).await.unwrap();
    assert!(report.playlists.is_empty());

    let mut cfg = Config::default();
    cfg.exclude = vec!["Road Trip".into()];
    let report = migrate(&source, &dest, &cfg.sync_config(&[]), &policy(1)).await.unwrap();
    assert!(report.playlists.is_empty());
    assert!(dest.searches().is_empty());
}

#[tokio::test]
async fn failing_destination_listing_is_a_sync_failure_not_an_auth_failure() {
    let source = ExportSource::from_export(road_trip_export());
    let dest = road_trip_destination();
    dest.fail_list_playlists(5);

    let result = migrate(&source, &dest, &sync_cfg(100), &policy(2)).await;
    let err = result.as_ref().unwrap_err();
    assert!(!is_auth_error(err));
    assert!(format!("{:#}", err).contains("listing destination playlists"));
    assert_eq!(exit_code(&result), EXIT_SYNC_FAILED);
    assert!(dest.created().is_empty());
}

#[tokio::test]
async fn lost_append_acknowledgement_does_not_duplicate_tracks() {
    let source = ExportSource::from_export(big_export(150));
    let dest = big_destination(150);
    dest.lose_append_ack(1);

    let report = migrate(&source, &dest, &sync_cfg(0), &policy(3)).await.unwrap();
    let big = report.get("Big").unwrap();
    assert_eq!(big.status, PlaylistStatus::Created);
    assert_eq!(big.appended, 150);
    let tracks = dest.playlist_tracks_by_name("Big").unwrap();
    assert_eq!(tracks.len(), 150);
    assert_eq!(tracks.iter().collect::<HashSet<_>>().len(), 150);
    assert_eq!(exit_code(&Ok(report)), 0);
}
