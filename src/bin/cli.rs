use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use playlist_migrate as lib;
use lib::api::export::ExportSource;
use lib::api::spotify::{SpotifyProvider, StoredToken};
use lib::api::SourceCatalog;
use lib::config::Config;
use lib::sync::{exit_code, EXIT_AUTH_FAILED, EXIT_SYNC_FAILED};
use std::path::{Path, PathBuf};
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "playlist-migrate", version, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Only sync these playlists (narrows the configured `playlists` filter)
    #[arg(value_name = "PLAYLIST")]
    names: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate config file and exit
    ConfigValidate,
    /// Store a token JSON for a destination service in the credentials DB
    ImportToken {
        /// Service the token belongs to (only "spotify" is supported)
        #[arg(long, default_value = "spotify")]
        service: String,
        /// Token JSON: access_token, token_type, expires_at, refresh_token, scope
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        client_secret: Option<String>,
    },
    /// List source playlists with entry counts
    ListSource,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Resolve config path: explicit --config overrides; otherwise prefer
    // system-wide /etc/playlist-migrate/config.toml and fall back to the
    // repository example config for local/dev usage.
    let resolved_config_path: PathBuf = match &cli.config {
        Some(p) => p.clone(),
        None => {
            let etc_path = Path::new("/etc/playlist-migrate/config.toml");
            if etc_path.exists() {
                etc_path.to_path_buf()
            } else {
                PathBuf::from("config/example-config.toml")
            }
        }
    };

    if let Some(Commands::ConfigValidate) = cli.command {
        match Config::from_path(&resolved_config_path) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    // Initialize log->tracing bridge and structured logging.
    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    std::fs::create_dir_all(&cfg.log_dir)
        .with_context(|| format!("creating log dir {}", cfg.log_dir.display()))?;
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "playlist-migrate.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    // Install as global default tracing subscriber without triggering
    // tracing-subscriber's internal log bridge (we already call LogTracer).
    tracing_subscriber_global::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    let code = match cli.command {
        Some(Commands::ConfigValidate) => 0,
        Some(Commands::ImportToken { service, file, client_id, client_secret }) => {
            import_token(&cfg, &service, &file, client_id, client_secret)?;
            0
        }
        Some(Commands::ListSource) => list_source(&cfg).await?,
        None => run_sync(&cfg, &cli.names).await?,
    };

    // flush the file appender before exiting
    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn import_token(
    cfg: &Config,
    service: &str,
    file: &Path,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> Result<()> {
    if !service.eq_ignore_ascii_case("spotify") {
        return Err(anyhow!("Unknown service '{}'. Expected 'spotify'.", service));
    }
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading token file {}", file.display()))?;
    let token: StoredToken = serde_json::from_str(&raw).context("token file is not a valid token JSON")?;
    let conn = lib::db::open_or_create(&cfg.db_path)
        .with_context(|| format!("opening DB at {}", cfg.db_path.display()))?;
    lib::db::save_credential_raw(
        &conn,
        "spotify",
        &serde_json::to_string(&token)?,
        client_id.as_deref(),
        client_secret.as_deref(),
    )?;
    tracing::info!("Spotify token saved to DB {}", cfg.db_path.display());
    println!("Saved token for spotify.");
    Ok(())
}

async fn list_source(cfg: &Config) -> Result<i32> {
    let source = ExportSource::new(cfg.source_export_path.clone());
    if let Err(e) = source.authenticate().await {
        eprintln!("Failed to open source: {:#}", e);
        return Ok(EXIT_AUTH_FAILED);
    }
    for p in source.list_playlists().await? {
        let changed = if p.last_modified_at > cfg.since { "changed" } else { "unchanged" };
        println!("- {} ({} entries, modified {}, {})", p.name, p.entries.len(), p.last_modified_at, changed);
    }
    Ok(0)
}

async fn run_sync(cfg: &Config, names: &[String]) -> Result<i32> {
    let sync_cfg = cfg.sync_config(names);
    let policy = cfg.call_policy();
    let source = ExportSource::new(cfg.source_export_path.clone());
    let destination = SpotifyProvider::new(String::new(), String::new(), cfg.db_path.clone())
        .with_user(cfg.spotify_user.clone());

    let result = lib::sync::migrate(&source, &destination, &sync_cfg, &policy).await;
    let code = exit_code(&result);
    let report = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{:#}; exiting.", e);
            if code == EXIT_AUTH_FAILED {
                eprintln!("Authentication failed: {:#}", e);
            } else {
                eprintln!("Sync failed: {:#}", e);
            }
            return Ok(code);
        }
    };

    for p in &report.playlists {
        println!(
            "- {}: {:?} | eligible {} | found {} | appended {} | not found {}",
            p.name,
            p.status,
            p.eligible,
            p.found,
            p.appended,
            p.not_found.len()
        );
    }
    let labels = report.not_found_labels();
    if !labels.is_empty() {
        println!("Tracks not found ({}):", labels.len());
        for l in &labels {
            println!("  {}", l);
        }
    }
    println!(
        "Synced {} playlist(s), {} track(s) appended, {} failure(s).",
        report.playlists.len(),
        report.total_appended(),
        report.failed_count()
    );

    if let Some(path) = &cfg.report_path {
        if let Err(e) = report.write_json(path) {
            tracing::error!("{:#}", e);
            return Ok(EXIT_SYNC_FAILED);
        }
    }

    Ok(code)
}
