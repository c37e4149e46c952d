//! # Sync Engine
//!
//! Keeps the [`LibraryCache`] in step with MPD (the source of truth for which
//! tracks exist) and the [`FeatureStore`] (the source of truth for feature ids).
//!
//! ## Modes
//!
//! - **Full resync**: drop the cache and ingest every track MPD lists.
//! - **Incremental**: ingest tracks MPD reports as added since the watermark.
//!   Tracks removed from MPD are *not* removed from the cache.
//!
//! Both push each track through the same pipeline: escape the URI, resolve its
//! feature id, skip it if the path is already cached, insert it. A failure to
//! produce a usable path or to insert aborts the whole run; rows inserted
//! before the failure stay.
//!
//! ## Verification
//!
//! [`SyncEngine::verify`] walks cached rows in feature id order alongside the
//! feature store's id sequence `1..=max_id`. Ids the cache lacks are backfilled
//! from the feature store and MPD; a cached row whose path disagrees with the
//! feature store's path for the same id is a [`WorfError::Divergence`] and ends
//! the pass. Running it again on consistent stores changes nothing.

use crate::db::{EntryKind, LibraryCache, LibraryEntry};
use crate::error::{Result, WorfError};
use crate::feature_store::FeatureStore;
use crate::mpd_client::{RemoteEntity, RemoteSource, RemoteTrack};
use crate::path_translator::PathTranslator;
use log::{debug, info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental { since: i64 },
}

impl SyncMode {
    /// Full when the library has never been synced, incremental otherwise.
    pub fn from_watermark(previous: Option<i64>) -> Self {
        match previous {
            Some(since) => SyncMode::Incremental { since },
            None => SyncMode::Full,
        }
    }
}

/// Counters for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Tracks received from MPD.
    pub seen: usize,
    pub inserted: usize,
    /// Tracks dropped because their path was already cached.
    pub duplicates: usize,
    /// Tracks cached without a feature id.
    pub unresolved: usize,
    /// Directories and playlists ignored.
    pub skipped_non_tracks: usize,
    /// Tracks whose added or modified time mpc printed unreadably, cached as 0.
    pub unreadable_times: usize,
}

/// Counters for one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub verified: usize,
    pub backfilled: usize,
    /// Backfilled tracks whose times could not be read, cached as 0.
    pub unreadable_times: usize,
    /// Feature ids with no song, no MPD metadata, or an id-less cached row.
    pub skipped: usize,
}

pub struct SyncEngine<'a> {
    cache: &'a LibraryCache,
    features: &'a FeatureStore,
    translator: &'a PathTranslator,
    remote: &'a dyn RemoteSource,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        cache: &'a LibraryCache,
        features: &'a FeatureStore,
        translator: &'a PathTranslator,
        remote: &'a dyn RemoteSource,
    ) -> Self {
        Self {
            cache,
            features,
            translator,
            remote,
        }
    }

    pub fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        match mode {
            SyncMode::Full => self.full_resync(),
            SyncMode::Incremental { since } => self.incremental_sync(since),
        }
    }

    /// Clear the cache and ingest every track MPD lists.
    pub fn full_resync(&self) -> Result<SyncReport> {
        self.cache.reset()?;

        info!("Listing every entity in MPD's database");
        let entities = self.remote.list_all()?;
        println!(
            "Getting all {} items, this will take a while...",
            entities.len()
        );

        let mut report = SyncReport::default();
        for entity in entities {
            match entity {
                RemoteEntity::Track(track) => self.ingest(&track, &mut report)?,
                RemoteEntity::Directory { path } | RemoteEntity::Playlist { path } => {
                    debug!("Skipping non-track entity {path}");
                    report.skipped_non_tracks += 1;
                }
            }
        }

        info!("Full resync done: {report:?}");
        Ok(report)
    }

    /// Ingest tracks added at or after `since`.
    pub fn incremental_sync(&self, since: i64) -> Result<SyncReport> {
        info!("Getting tracks added since {since}");
        let tracks = self.remote.added_since(since)?;
        if tracks.is_empty() {
            println!("No new songs");
        }

        let mut report = SyncReport::default();
        for track in &tracks {
            self.ingest(track, &mut report)?;
        }

        info!("Incremental sync done: {report:?}");
        Ok(report)
    }

    /// Normalize, resolve, dedupe and insert one track.
    fn ingest(&self, track: &RemoteTrack, report: &mut SyncReport) -> Result<()> {
        report.seen += 1;

        let path = self.translator.to_storage(&track.uri)?;
        if track.unreadable_time {
            report.unreadable_times += 1;
        }

        let feature_id = self
            .features
            .lookup_id_by_path(&self.translator.to_absolute(&track.uri))?;
        if feature_id.is_none() {
            warn!("Failed to get feature id for {path}");
            report.unresolved += 1;
        }

        if self.cache.contains_path(&path)? {
            warn!("Duplicate found for {path}");
            report.duplicates += 1;
            return Ok(());
        }

        self.cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: track.added_time,
            modified_time: track.modified_time,
            path,
            feature_id,
        })?;
        report.inserted += 1;
        Ok(())
    }

    /// Reconcile the cache against the feature store's dense id sequence.
    pub fn verify(&self) -> Result<VerifyReport> {
        let max_id = self.features.max_id()?;
        info!("Verifying library cache against feature ids 1..={max_id}");

        let mut report = VerifyReport::default();
        let mut expected: i64 = 1;

        self.cache.scan_by_feature_id(|rows| {
            for row in rows {
                let entry = row?;
                let Some(feature_id) = entry.feature_id else {
                    continue;
                };

                // Rows backfilled during this scan can show up again.
                if feature_id < expected {
                    debug!("Feature id {feature_id} already handled");
                    continue;
                }

                while expected < feature_id {
                    self.backfill(expected, &mut report)?;
                    expected += 1;
                }

                self.check(&entry, feature_id)?;
                report.verified += 1;
                expected = feature_id + 1;
            }
            Ok(())
        })?;

        // Ids past the last cached row are missing too.
        while expected <= max_id {
            self.backfill(expected, &mut report)?;
            expected += 1;
        }

        info!("Verification done: {report:?}");
        Ok(report)
    }

    /// The cached row and the feature store must agree on the path for `feature_id`.
    fn check(&self, entry: &LibraryEntry, feature_id: i64) -> Result<()> {
        let expected = match self.features.path_for_id(feature_id)? {
            Some(absolute) => self
                .translator
                .to_storage(&self.translator.to_relative(&absolute)?)?,
            None => {
                return Err(WorfError::Divergence {
                    feature_id,
                    cached: entry.path.clone(),
                    expected: "<no such song>".to_string(),
                })
            }
        };

        if expected != entry.path {
            return Err(WorfError::Divergence {
                feature_id,
                cached: entry.path.clone(),
                expected,
            });
        }

        debug!("Feature id {feature_id} verified: {expected}");
        Ok(())
    }

    /// Insert the track the feature store knows as `feature_id`.
    fn backfill(&self, feature_id: i64, report: &mut VerifyReport) -> Result<()> {
        let Some(absolute) = self.features.path_for_id(feature_id)? else {
            debug!("No song with feature id {feature_id}");
            report.skipped += 1;
            return Ok(());
        };

        let relative = self.translator.to_relative(&absolute)?;
        let Some(track) = self.remote.lookup_track(&relative)? else {
            warn!("Feature id {feature_id} ({relative}) is unknown to MPD, skipping");
            report.skipped += 1;
            return Ok(());
        };

        let path = self.translator.to_storage(&relative)?;
        if let Some(existing) = self.cache.entry_by_path(&path)? {
            return match existing.feature_id {
                Some(other) if other != feature_id => Err(WorfError::Divergence {
                    feature_id,
                    cached: format!("{} (cached as feature id {other})", existing.path),
                    expected: path,
                }),
                _ => {
                    warn!("{path} is cached without a feature id, leaving it as is");
                    report.skipped += 1;
                    Ok(())
                }
            };
        }

        self.cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: track.added_time,
            modified_time: track.modified_time,
            path,
            feature_id: Some(feature_id),
        })?;
        info!("Backfilled feature id {feature_id}: {relative}");
        report.backfilled += 1;
        if track.unreadable_time {
            report.unreadable_times += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::feature_store::tests::create_test_store;
    use std::cell::Cell;

    /// MPD stand-in serving a fixed track list.
    struct StaticRemote {
        entities: Vec<RemoteEntity>,
        list_calls: Cell<usize>,
    }

    impl StaticRemote {
        fn tracks(uris: &[&str]) -> Self {
            Self {
                entities: uris
                    .iter()
                    .enumerate()
                    .map(|(i, uri)| {
                        RemoteEntity::Track(RemoteTrack {
                            uri: uri.to_string(),
                            added_time: 100 + i as i64,
                            modified_time: 50,
                            unreadable_time: false,
                        })
                    })
                    .collect(),
                list_calls: Cell::new(0),
            }
        }

        fn track_list(&self) -> impl Iterator<Item = &RemoteTrack> {
            self.entities.iter().filter_map(|e| match e {
                RemoteEntity::Track(t) => Some(t),
                _ => None,
            })
        }
    }

    impl RemoteSource for StaticRemote {
        fn check_connection(&self) -> std::result::Result<(), RemoteError> {
            Ok(())
        }
        fn list_all(&self) -> std::result::Result<Vec<RemoteEntity>, RemoteError> {
            self.list_calls.set(self.list_calls.get() + 1);
            Ok(self.entities.clone())
        }
        fn added_since(&self, since: i64) -> std::result::Result<Vec<RemoteTrack>, RemoteError> {
            Ok(self
                .track_list()
                .filter(|t| t.added_time >= since)
                .cloned()
                .collect())
        }
        fn lookup_track(&self, uri: &str) -> std::result::Result<Option<RemoteTrack>, RemoteError> {
            Ok(self.track_list().find(|t| t.uri == uri).cloned())
        }
        fn remove_playlist(&self, _name: &str) -> std::result::Result<(), RemoteError> {
            Ok(())
        }
        fn playlist_add(&self, _name: &str, _uri: &str) -> std::result::Result<(), RemoteError> {
            Ok(())
        }
    }

    fn translator() -> PathTranslator {
        PathTranslator::new("/music").unwrap()
    }

    #[test]
    fn test_mode_from_watermark() {
        assert_eq!(SyncMode::from_watermark(None), SyncMode::Full);
        assert_eq!(
            SyncMode::from_watermark(Some(5)),
            SyncMode::Incremental { since: 5 }
        );
    }

    #[test]
    fn test_full_resync_skips_non_tracks_and_caches_unresolved() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[(1, "/music/a.mp3", 0.1)])?;
        let t = translator();
        let mut remote = StaticRemote::tracks(&["a.mp3", "it's.mp3"]);
        remote.entities.insert(
            0,
            RemoteEntity::Directory {
                path: "Rock".to_string(),
            },
        );
        remote.entities.push(RemoteEntity::Playlist {
            path: "faves".to_string(),
        });

        let report = SyncEngine::new(&cache, &store, &t, &remote).full_resync()?;
        assert_eq!(report.seen, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.skipped_non_tracks, 2);

        let escaped = cache.entry_by_path("it''s.mp3")?.expect("escaped path cached");
        assert_eq!(escaped.feature_id, None);
        assert_eq!(cache.path_for_feature_id(1)?, Some("a.mp3".to_string()));
        Ok(())
    }

    #[test]
    fn test_unreadable_times_are_counted() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[(1, "/music/a.mp3", 0.1), (2, "/music/b.mp3", 0.2)])?;
        let t = translator();
        let mut remote = StaticRemote::tracks(&["a.mp3"]);
        remote.entities.push(RemoteEntity::Track(
            crate::mpd_client::parse_track_line("b.mp3\tsometime\t1600000000").unwrap(),
        ));
        let engine = SyncEngine::new(&cache, &store, &t, &remote);

        let report = engine.full_resync()?;
        assert_eq!(report.inserted, 2);
        assert_eq!(report.unreadable_times, 1);
        let b = cache.entry_by_path("b.mp3")?.unwrap();
        assert_eq!((b.added_time, b.modified_time), (0, 1_600_000_000));

        // Backfill carries the same marker.
        cache.reset()?;
        cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: 1,
            modified_time: 1,
            path: "a.mp3".to_string(),
            feature_id: Some(1),
        })?;
        let verified = engine.verify()?;
        assert_eq!(verified.backfilled, 1);
        assert_eq!(verified.unreadable_times, 1);
        Ok(())
    }

    #[test]
    fn test_duplicate_in_stream_is_skipped() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[(1, "/music/a.mp3", 0.1)])?;
        let t = translator();
        let remote = StaticRemote::tracks(&["a.mp3", "a.mp3"]);

        let report = SyncEngine::new(&cache, &store, &t, &remote).full_resync()?;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(cache.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_incremental_sync_adds_only_new_tracks() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[(1, "/music/a.mp3", 0.1), (2, "/music/b.mp3", 0.2)])?;
        let t = translator();
        // added_time: a=100, b=101
        let remote = StaticRemote::tracks(&["a.mp3", "b.mp3"]);
        let engine = SyncEngine::new(&cache, &store, &t, &remote);

        let report = engine.incremental_sync(101)?;
        assert_eq!(report.inserted, 1);
        assert_eq!(cache.path_for_feature_id(2)?, Some("b.mp3".to_string()));
        assert_eq!(cache.path_for_feature_id(1)?, None);
        assert_eq!(remote.list_calls.get(), 0);

        // Re-running overlaps the previous window and only finds duplicates.
        let again = engine.incremental_sync(100)?;
        assert_eq!(again.inserted, 1);
        assert_eq!(again.duplicates, 1);
        Ok(())
    }

    #[test]
    fn test_empty_uri_aborts_run() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[])?;
        let t = translator();
        let mut remote = StaticRemote::tracks(&["a.mp3", "b.mp3"]);
        remote.entities.insert(
            1,
            RemoteEntity::Track(RemoteTrack {
                uri: String::new(),
                added_time: 0,
                modified_time: 0,
                unreadable_time: false,
            }),
        );

        let err = SyncEngine::new(&cache, &store, &t, &remote)
            .full_resync()
            .unwrap_err();
        assert!(matches!(err, WorfError::InvalidInput(_)));
        // Rows before the failure stay committed.
        assert_eq!(cache.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_empty_uri_aborts_incremental_sync() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[])?;
        let t = translator();
        let mut remote = StaticRemote::tracks(&["a.mp3", "b.mp3"]);
        remote.entities.insert(
            1,
            RemoteEntity::Track(RemoteTrack {
                uri: String::new(),
                added_time: 150,
                modified_time: 0,
                unreadable_time: false,
            }),
        );

        let err = SyncEngine::new(&cache, &store, &t, &remote)
            .incremental_sync(0)
            .unwrap_err();
        assert!(matches!(err, WorfError::InvalidInput(_)));
        assert_eq!(cache.count()?, 1);
        assert!(!cache.contains_path("b.mp3")?);
        Ok(())
    }

    #[test]
    fn test_verify_aborts_on_path_outside_library() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[
            (1, "/music/a.mp3", 0.1),
            (2, "/elsewhere/b.mp3", 0.2),
            (3, "/music/c.mp3", 0.3),
        ])?;
        let t = translator();
        let remote = StaticRemote::tracks(&["a.mp3", "c.mp3"]);

        let err = SyncEngine::new(&cache, &store, &t, &remote)
            .verify()
            .unwrap_err();
        assert!(
            matches!(&err, WorfError::PrefixMismatch { path, .. } if path == "/elsewhere/b.mp3"),
            "{err}"
        );
        // Id 1 went in before the failure, id 3 was never reached.
        assert_eq!(cache.count()?, 1);
        assert_eq!(cache.path_for_feature_id(1)?, Some("a.mp3".to_string()));
        assert_eq!(cache.path_for_feature_id(3)?, None);
        Ok(())
    }

    #[test]
    fn test_verify_tail_backfill_and_stale_ids() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[
            (1, "/music/a.mp3", 0.1),
            (2, "/music/gone.mp3", 0.2),
            (4, "/music/d.mp3", 0.4),
        ])?;
        let t = translator();
        let remote = StaticRemote::tracks(&["a.mp3", "d.mp3"]);
        let engine = SyncEngine::new(&cache, &store, &t, &remote);

        cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: 1,
            modified_time: 1,
            path: "a.mp3".to_string(),
            feature_id: Some(1),
        })?;

        let report = engine.verify()?;
        assert_eq!(report.verified, 1);
        assert_eq!(report.backfilled, 1, "id 4 backfilled from the tail");
        assert_eq!(report.skipped, 2, "id 2 is stale, id 3 does not exist");
        assert_eq!(cache.path_for_feature_id(4)?, Some("d.mp3".to_string()));

        let second = engine.verify()?;
        assert_eq!(second.backfilled, 0);
        assert_eq!(second.verified, 2);
        assert_eq!(cache.count()?, 2);
        Ok(())
    }

    #[test]
    fn test_verify_cached_id_missing_from_store_diverges() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[(1, "/music/a.mp3", 0.1)])?;
        let t = translator();
        let remote = StaticRemote::tracks(&["a.mp3"]);

        cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: 1,
            modified_time: 1,
            path: "a.mp3".to_string(),
            feature_id: Some(1),
        })?;
        cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: 1,
            modified_time: 1,
            path: "z.mp3".to_string(),
            feature_id: Some(2),
        })?;

        let err = SyncEngine::new(&cache, &store, &t, &remote)
            .verify()
            .unwrap_err();
        assert!(matches!(err, WorfError::Divergence { feature_id: 2, .. }));
        Ok(())
    }

    #[test]
    fn test_verify_leaves_idless_row_alone() -> Result<()> {
        let cache = LibraryCache::open_in_memory()?;
        let store = create_test_store(&[(1, "/music/a.mp3", 0.1)])?;
        let t = translator();
        let remote = StaticRemote::tracks(&["a.mp3"]);

        cache.insert(&LibraryEntry {
            kind: EntryKind::Track,
            added_time: 1,
            modified_time: 1,
            path: "a.mp3".to_string(),
            feature_id: None,
        })?;

        let report = SyncEngine::new(&cache, &store, &t, &remote).verify()?;
        assert_eq!(report.skipped, 1);
        assert_eq!(cache.entry_by_path("a.mp3")?.and_then(|e| e.feature_id), None);
        Ok(())
    }
}
