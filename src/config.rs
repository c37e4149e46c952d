//! # Configuration Module
//!
//! Data directory layout and the resolved runtime settings.
//!
//! ## Data Storage
//!
//! Worf keeps its own state in the platform-standard data directory:
//! - Linux: `~/.local/share/worf/`
//! - macOS: `~/Library/Application Support/worf/`
//! - Windows: `%APPDATA%\worf\`
//!
//! It holds the library cache (`library.db`) and the sync watermark
//! (`timestamp`). The analyzer's feature database lives wherever `blissify`
//! put it, by default `<data_dir>/bliss-rs/songs.db`.

use crate::analyzer::AnalyzerConfig;
use crate::mpd_client::MpcClient;
use crate::playlist::{SimilarityConfig, DEFAULT_EPSILON};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "worf";
pub const CACHE_DB_FILE: &str = "library.db";
pub const WATERMARK_FILE: &str = "timestamp";

/// Returns the worf data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The worf subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = system_data_dir()?;

    let worf_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&worf_dir).with_context(|| {
        format!(
            "Failed to create worf data directory at {}. Please check file permissions.",
            worf_dir.display()
        )
    })?;

    Ok(worf_dir)
}

/// Library cache location inside [`get_data_dir`].
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CACHE_DB_FILE))
}

/// Watermark file location inside [`get_data_dir`].
pub fn get_watermark_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(WATERMARK_FILE))
}

/// Where `blissify` keeps its database unless told otherwise.
pub fn default_feature_db_path() -> Result<PathBuf> {
    Ok(system_data_dir()?.join("bliss-rs").join("songs.db"))
}

fn system_data_dir() -> Result<PathBuf> {
    dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })
}

/// Everything a run needs, resolved from flags, environment and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// MPD's music directory as seen by the analyzer.
    pub music_dir: PathBuf,
    pub feature_db: PathBuf,
    pub cache_db: PathBuf,
    pub watermark: PathBuf,
    pub mpd_host: Option<String>,
    pub mpd_port: Option<u16>,
    #[serde(skip_serializing, default)]
    pub mpd_password: Option<String>,
    #[serde(skip_serializing, default)]
    pub analyzer_password: Option<String>,
    pub epsilon: f64,
}

impl RuntimeConfig {
    /// Settings with explicit file locations. Nothing is created on disk.
    pub fn with_paths(
        music_dir: impl Into<PathBuf>,
        feature_db: impl Into<PathBuf>,
        cache_db: impl Into<PathBuf>,
        watermark: impl Into<PathBuf>,
    ) -> Self {
        Self {
            music_dir: music_dir.into(),
            feature_db: feature_db.into(),
            cache_db: cache_db.into(),
            watermark: watermark.into(),
            mpd_host: None,
            mpd_port: None,
            mpd_password: None,
            analyzer_password: None,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    pub fn mpc_client(&self) -> MpcClient {
        MpcClient::new(
            self.mpd_host.clone(),
            self.mpd_port,
            self.mpd_password.clone(),
        )
    }

    /// The analyzer talks to the same MPD, with its own password if one is set.
    pub fn analyzer(&self) -> AnalyzerConfig {
        let defaults = AnalyzerConfig::default();
        AnalyzerConfig {
            host: self.mpd_host.clone().unwrap_or(defaults.host),
            port: self.mpd_port.unwrap_or(defaults.port),
            password: self
                .analyzer_password
                .clone()
                .or_else(|| self.mpd_password.clone()),
            ..defaults
        }
    }

    pub fn similarity(&self) -> SimilarityConfig {
        SimilarityConfig {
            epsilon: self.epsilon,
        }
    }
}
