//! Library mirror and playlist generator for MPD and the bliss analyzer.
//!
//! Core modules:
//! - [`sync`] - Keeps the library cache in step with MPD and the feature store
//! - [`playlist`] - Random and similarity playlists
//! - [`feature_store`] - Read-only access to the analyzer's database
//! - [`db`] - The library cache
//! - [`path_translator`] - Absolute, relative and storage-escaped paths
//!
//! ### Supporting Modules
//!
//! - [`mpd_client`] - The [`mpd_client::RemoteSource`] seam and its `mpc` implementation
//! - [`watermark`] - Timestamp of the last sync run
//! - [`analyzer`] - Runs `blissify update`
//! - [`config`] - Data directory and resolved runtime settings
//! - [`error`] - Error taxonomy
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use worf::db::LibraryCache;
//! use worf::feature_store::FeatureStore;
//! use worf::mpd_client::MpcClient;
//! use worf::path_translator::PathTranslator;
//! use worf::playlist::PlaylistGenerator;
//! use worf::sync::{SyncEngine, SyncMode};
//! use std::path::Path;
//!
//! let translator = PathTranslator::new("/srv/music")?;
//! let features = FeatureStore::open(Path::new("/home/me/.local/share/bliss-rs/songs.db"))?;
//! let cache = LibraryCache::open(&worf::config::get_db_path()?)?;
//! let mpd = MpcClient::default();
//!
//! let engine = SyncEngine::new(&cache, &features, &translator, &mpd);
//! engine.run(SyncMode::Full)?;
//! engine.verify()?;
//!
//! let generator = PlaylistGenerator::new(&features, &cache, &translator, &mpd);
//! generator.similar_to("evening", 1234, 30)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Stores
//!
//! Three stores are involved and none of them is authoritative for everything:
//!
//! - **MPD** decides which tracks exist
//! - **The feature store** decides which feature id belongs to which file
//! - **The library cache** is ours, and is rebuilt from the other two
//!
//! A full resync rebuilds the cache from MPD; incremental syncs only add what
//! MPD reports as new. Verification then walks the feature store's ids and
//! fills the gaps, or stops at the first id the two stores disagree on.

pub mod analyzer;
pub mod config;
pub mod db;
pub mod error;
pub mod feature_store;
pub mod mpd_client;
pub mod path_translator;
pub mod playlist;
pub mod sync;
pub mod watermark;
