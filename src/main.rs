//! # Worf
//!
//! Keeps a local mirror of MPD's library in step with the bliss feature
//! database and builds stored playlists from it.
//!
//! ## Usage
//!
//! ```bash
//! # First run: full resync, later runs pick up new tracks only
//! worf sync --verify
//!
//! # 50 random songs as "bliss-playlist"
//! worf playlist
//!
//! # Songs that sound like feature id 1234
//! worf playlist --song-id 1234 --length 30 --name evening
//! ```

mod cli;
mod completion;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info, warn};
use serde::Serialize;
use std::io;
use worf::analyzer;
use worf::config::RuntimeConfig;
use worf::db::LibraryCache;
use worf::error::WorfError;
use worf::feature_store::FeatureStore;
use worf::mpd_client::{MpcClient, RemoteSource};
use worf::path_translator::PathTranslator;
use worf::playlist::{self, PlaylistGenerator};
use worf::sync::{SyncEngine, SyncMode};
use worf::watermark::Watermark;

/// Handles shared by every command. Dropped (and closed) on every exit path.
struct Stores {
    cache: LibraryCache,
    features: FeatureStore,
    translator: PathTranslator,
    remote: MpcClient,
}

impl Stores {
    fn open(config: &RuntimeConfig) -> Result<Self> {
        let translator = PathTranslator::new(config.music_dir())
            .context("Invalid music directory")?;
        let features = FeatureStore::open(&config.feature_db).with_context(|| {
            format!(
                "Failed to open feature database {}. Has `blissify init` been run?",
                config.feature_db.display()
            )
        })?;
        let cache = LibraryCache::open(&config.cache_db).context("Failed to open library cache")?;
        let remote = config.mpc_client();
        remote
            .check_connection()
            .context("Could not reach MPD. Check MPD_HOST and MPD_PORT")?;

        Ok(Self {
            cache,
            features,
            translator,
            remote,
        })
    }

    fn engine(&self) -> SyncEngine<'_> {
        SyncEngine::new(&self.cache, &self.features, &self.translator, &self.remote)
    }
}

fn main() -> Result<()> {
    // Loaded first so RUST_LOG can live in .env too.
    let dotenv = dotenvy::dotenv();
    env_logger::init();
    match dotenv {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!("Ignoring unreadable .env file: {e}"),
    }

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Sync(sync) => {
            let config = args.global.resolve()?;
            let mode = start_sync(&config, &sync)?;
            let stores = Stores::open(&config)?;
            sync_library(&stores, mode, &sync)?;
        }
        cli::Command::Verify { json } => {
            let config = args.global.resolve()?;
            let stores = Stores::open(&config)?;
            verify_library(&stores, json)?;
        }
        cli::Command::Playlist(request) => {
            let config = args.global.resolve()?;
            let stores = Stores::open(&config)?;
            build_playlist(&stores, &config, &request)?;
        }
        cli::Command::Run { sync, playlist } => {
            let config = args.global.resolve()?;
            let mode = start_sync(&config, &sync)?;
            let stores = Stores::open(&config)?;
            sync_library(&stores, mode, &sync)?;
            if !sync.verify {
                verify_library(&stores, sync.json)?;
            }
            build_playlist(&stores, &config, &playlist)?;
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::print_completions(shell, &mut cmd);
        }
    }

    Ok(())
}

/// Advance the watermark and refresh the feature store. Returns the sync mode
/// the previous watermark calls for.
fn start_sync(config: &RuntimeConfig, args: &cli::SyncArgs) -> Result<SyncMode> {
    let watermark = Watermark::at(&config.watermark);
    let previous = watermark.advance().with_context(|| {
        format!("Failed to update watermark {}", watermark.path().display())
    })?;

    if args.no_analyzer {
        info!("Skipping analyzer run");
    } else {
        analyzer::run_update(&config.analyzer()).context("Feature extraction failed")?;
    }

    Ok(if args.full {
        SyncMode::Full
    } else {
        SyncMode::from_watermark(previous)
    })
}

fn sync_library(stores: &Stores, mode: SyncMode, args: &cli::SyncArgs) -> Result<()> {
    info!("Syncing library cache: {mode:?}");
    let report = stores.engine().run(mode).context("Library sync failed")?;

    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "Synced {} tracks: {} added, {} duplicates, {} without features",
            report.seen, report.inserted, report.duplicates, report.unresolved
        );
        if report.unreadable_times > 0 {
            warn!(
                "{} tracks had times mpc printed in an unreadable form and were cached with 0",
                report.unreadable_times
            );
        }
    }

    if args.verify {
        verify_library(stores, args.json)?;
    }
    Ok(())
}

fn verify_library(stores: &Stores, json: bool) -> Result<()> {
    let report = match stores.engine().verify() {
        Ok(report) => report,
        Err(e @ WorfError::Divergence { .. }) => {
            eprintln!("The library cache no longer matches the feature store.");
            eprintln!("Run `worf sync --full` to rebuild it.");
            return Err(e).context("Verification failed");
        }
        Err(e) => return Err(e).context("Verification failed"),
    };

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Verified {} tracks, backfilled {}, skipped {}",
            report.verified, report.backfilled, report.skipped
        );
        if report.unreadable_times > 0 {
            warn!(
                "{} backfilled tracks were cached with 0 for unreadable times",
                report.unreadable_times
            );
        }
    }
    Ok(())
}

fn build_playlist(
    stores: &Stores,
    config: &RuntimeConfig,
    request: &cli::PlaylistArgs,
) -> Result<()> {
    let generator = PlaylistGenerator::new(
        &stores.features,
        &stores.cache,
        &stores.translator,
        &stores.remote,
    )
    .with_similarity(config.similarity());

    let base_id = match (&request.song_id, &request.song_glob) {
        (Some(id), _) => Some(*id),
        (None, Some(pattern)) => Some(
            playlist::select_from_glob(
                &stores.features,
                &stores.translator,
                pattern,
                io::stdin().lock(),
                io::stdout(),
            )
            .context("No song selected")?,
        ),
        (None, None) => None,
    };

    let result = match base_id {
        Some(id) => generator.similar_to(&request.name, id, request.length),
        None => generator.random(&request.name, request.length),
    };

    match result {
        Ok(paths) => {
            println!("Playlist {} ready with {} songs", request.name, paths.len());
            Ok(())
        }
        Err(e) => {
            if let Some(hint) = e.remediation_hint(&request.name) {
                eprintln!("{hint}");
            }
            Err(e).with_context(|| format!("Failed to build playlist {}", request.name))
        }
    }
}

fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
