use std::fs::File;
use std::io::Write;
use tempfile::tempdir;

use playlist_migrate::config::Config;
use playlist_migrate::db;

#[test]
fn config_from_path_parses_toml() {
    let td = tempdir().unwrap();
    let cfg_path = td.path().join("cfg.toml");
    let mut f = File::create(&cfg_path).unwrap();
    let toml = r#"
since = 1500000000000000
playlists = ["Road Trip", "Gym"]
batch_size = 250
source_export_path = "/tmp/export.json"
db_path = "/tmp/test.db"
log_dir = "/tmp"
"#;
    f.write_all(toml.as_bytes()).unwrap();
    let cfg = Config::from_path(&cfg_path).expect("parse config");
    assert_eq!(cfg.since, 1500000000000000);
    assert_eq!(cfg.source_export_path.to_str().unwrap(), "/tmp/export.json");
    assert_eq!(cfg.db_path.to_str().unwrap(), "/tmp/test.db");
    assert_eq!(cfg.store_id_prefix, "T");

    // clamped to what the destination accepts in one call
    let sync = cfg.sync_config(&["Gym".to_string(), "Other".to_string()]);
    assert_eq!(sync.batch_size, 100);
    let names = sync.name_filter.unwrap();
    assert_eq!(names.len(), 1);
    assert!(names.contains("Gym"));
}

#[test]
fn example_config_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/example-config.toml");
    Config::from_path(&path).expect("example config parses");
}

#[test]
fn run_migrations_creates_tables() {
    let td = tempdir().unwrap();
    let db_path = td.path().join("test.db");
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    db::run_migrations(&conn).expect("run migrations");
    // idempotent
    db::run_migrations(&conn).expect("run migrations twice");
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='credentials'")
        .unwrap();
    let mut rows = stmt.query([]).unwrap();
    let found = rows.next().unwrap().is_some();
    assert!(found, "credentials table should exist after migrations");
}

#[test]
fn saving_a_token_keeps_existing_client_credentials() {
    let td = tempdir().unwrap();
    let conn = db::open_or_create(&td.path().join("nested/dir/test.db")).unwrap();
    db::save_credential_raw(&conn, "spotify", r#"{"a":1}"#, Some("cid"), Some("secret")).unwrap();
    db::save_credential_raw(&conn, "spotify", r#"{"a":2}"#, None, None).unwrap();

    let (json, id, secret) = db::load_credential_with_client(&conn, "spotify").unwrap().unwrap();
    assert_eq!(json, r#"{"a":2}"#);
    assert_eq!(id.as_deref(), Some("cid"));
    assert_eq!(secret.as_deref(), Some("secret"));
    assert!(db::load_credential_with_client(&conn, "tidal").unwrap().is_none());
}
