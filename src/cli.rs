//! # Command-Line Interface Module
//!
//! Clap definitions for the `worf` binary. Connection settings and file
//! locations are global flags that fall back to the same environment variables
//! the analyzer and `mpc` use, so a `.env` file next to the binary is enough to
//! configure a run.
//!
//! ## Commands
//!
//! - `sync`: run the analyzer, then bring the library cache up to date
//! - `verify`: reconcile the library cache against the feature store
//! - `playlist`: build a random or similarity playlist on MPD
//! - `run`: sync, verify and build a playlist in one go
//!
//! ## Examples
//!
//! ```bash
//! MUSIC_DIR=/srv/music worf sync --verify
//! worf playlist --song-glob '*miles davis*' --length 30
//! worf run --name evening
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use std::path::PathBuf;
use worf::config::{self, RuntimeConfig};
use worf::playlist::{DEFAULT_EPSILON, DEFAULT_PLAYLIST_LENGTH, DEFAULT_PLAYLIST_NAME};

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
#[command(name = "worf")]
#[command(about = "Worf: MPD library mirror and bliss playlist generator")]
#[command(version)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every command.
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// MPD's music directory, as the analyzer sees it
    #[arg(long, env = "MUSIC_DIR", global = true, value_hint = clap::ValueHint::DirPath)]
    pub music_dir: Option<PathBuf>,

    /// The analyzer's feature database
    #[arg(long, env = "BLISS_DB", global = true, value_hint = clap::ValueHint::FilePath)]
    pub bliss_db: Option<PathBuf>,

    /// Library cache database (defaults to the worf data directory)
    #[arg(long, env = "WORF_CACHE_DB", global = true, value_hint = clap::ValueHint::FilePath)]
    pub cache_db: Option<PathBuf>,

    #[arg(long, env = "MPD_HOST", global = true)]
    pub mpd_host: Option<String>,

    #[arg(long, env = "MPD_PORT", global = true)]
    pub mpd_port: Option<u16>,

    #[arg(long, env = "MPD_PASSWORD", hide_env_values = true, global = true)]
    pub mpd_password: Option<String>,

    /// MPD password the analyzer should use, if different
    #[arg(long, env = "BLISSIFY_PASSWORD", hide_env_values = true, global = true)]
    pub blissify_password: Option<String>,

    /// Distances closer than this rank as ties in similarity playlists
    #[arg(long, default_value_t = DEFAULT_EPSILON, global = true)]
    pub epsilon: f64,
}

impl GlobalArgs {
    /// Fill in defaults and check what every non-completion command needs.
    pub fn resolve(&self) -> Result<RuntimeConfig> {
        let Some(music_dir) = &self.music_dir else {
            bail!("MUSIC_DIR is not set. Pass --music-dir or set it in the environment or .env");
        };
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            bail!("--epsilon must be a non-negative number, got {}", self.epsilon);
        }

        let feature_db = match &self.bliss_db {
            Some(path) => path.clone(),
            None => config::default_feature_db_path()?,
        };
        let cache_db = match &self.cache_db {
            Some(path) => path.clone(),
            None => config::get_db_path()?,
        };

        let mut runtime = RuntimeConfig::with_paths(
            music_dir,
            feature_db,
            cache_db,
            config::get_watermark_path()?,
        );
        runtime.mpd_host = self.mpd_host.clone();
        runtime.mpd_port = self.mpd_port;
        runtime.mpd_password = self.mpd_password.clone();
        runtime.analyzer_password = self.blissify_password.clone();
        runtime.epsilon = self.epsilon;

        if let Ok(json) = serde_json::to_string(&runtime) {
            debug!("Runtime config: {json}");
        }
        Ok(runtime)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the library cache up to date with MPD
    ///
    /// Runs a full resync the first time and after --full, otherwise only
    /// picks up tracks MPD added since the last run. Tracks removed from MPD
    /// stay cached until the next full resync.
    Sync(SyncArgs),

    /// Check the library cache against the feature store
    ///
    /// Backfills tracks the cache is missing and stops on the first feature
    /// id whose cached path disagrees with the feature store.
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a playlist on MPD
    ///
    /// Without --song-id or --song-glob the playlist is a random sample of
    /// the library; with one of them it is ranked by similarity to that song.
    Playlist(PlaylistArgs),

    /// Sync, verify and build a playlist in one go
    Run {
        #[command(flatten)]
        sync: SyncArgs,

        #[command(flatten)]
        playlist: PlaylistArgs,
    },

    /// Generate shell completions
    ///
    /// Usage: worf completion bash > ~/.local/share/bash-completion/completions/worf
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct SyncArgs {
    /// Drop the cache and resync everything
    #[arg(long)]
    pub full: bool,

    /// Verify the cache after syncing
    #[arg(long)]
    pub verify: bool,

    /// Skip running `blissify update` first
    #[arg(long)]
    pub no_analyzer: bool,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlaylistArgs {
    /// Rank by similarity to the song with this feature id
    #[arg(long, conflicts_with = "song_glob")]
    pub song_id: Option<i64>,

    /// Pick the base song from those whose path matches this glob
    ///
    /// Matches are listed numbered from 0; enter a number to choose one.
    #[arg(long)]
    pub song_glob: Option<String>,

    /// Number of songs in the playlist
    #[arg(short = 'n', long, default_value_t = DEFAULT_PLAYLIST_LENGTH)]
    pub length: usize,

    /// Name of the stored playlist to replace
    #[arg(long, default_value = DEFAULT_PLAYLIST_NAME)]
    pub name: String,
}
