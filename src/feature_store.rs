//! # Feature Store Adapter
//!
//! Read-only access to the SQLite database written by the external analyzer
//! (`blissify`). Only two of its relations matter here:
//!
//! - `song (id, path, ...)` where `path` is absolute on the analyzer's machine
//! - `feature (song_id, feature_index, feature)`, exactly 20 rows per song
//!
//! Every operation is a single parameterized query. Failures are reported as
//! [`WorfError::Store`] and never retried.

use crate::error::{Result, WorfError};
use log::{debug, warn};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;

pub const NUM_FEATURES: usize = 20;

/// Bitmask with one bit per feature index, all set.
const COMPLETE_MASK: u32 = (1 << NUM_FEATURES) - 1;

/// The analyzer's feature dimensions, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Tempo,
    ZeroCrossingRate,
    MeanSpectralCentroid,
    StdDevSpectralCentroid,
    MeanSpectralRolloff,
    StdDevSpectralRolloff,
    MeanSpectralFlatness,
    StdDevSpectralFlatness,
    MeanLoudness,
    StdDevLoudness,
    ChromaIntervalOne,
    ChromaIntervalTwo,
    ChromaIntervalThree,
    ChromaIntervalFour,
    ChromaIntervalFive,
    ChromaIntervalSix,
    ChromaIntervalSeven,
    ChromaIntervalEight,
    ChromaIntervalNine,
    ChromaIntervalTen,
}

impl Feature {
    pub const ALL: [Feature; NUM_FEATURES] = [
        Feature::Tempo,
        Feature::ZeroCrossingRate,
        Feature::MeanSpectralCentroid,
        Feature::StdDevSpectralCentroid,
        Feature::MeanSpectralRolloff,
        Feature::StdDevSpectralRolloff,
        Feature::MeanSpectralFlatness,
        Feature::StdDevSpectralFlatness,
        Feature::MeanLoudness,
        Feature::StdDevLoudness,
        Feature::ChromaIntervalOne,
        Feature::ChromaIntervalTwo,
        Feature::ChromaIntervalThree,
        Feature::ChromaIntervalFour,
        Feature::ChromaIntervalFive,
        Feature::ChromaIntervalSix,
        Feature::ChromaIntervalSeven,
        Feature::ChromaIntervalEight,
        Feature::ChromaIntervalNine,
        Feature::ChromaIntervalTen,
    ];

    /// Position of this feature in the `feature_index` column.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One song's analysis, copied out of the feature store.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub feature_id: i64,
    pub dimensions: [f64; NUM_FEATURES],
}

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> f64 {
        self.dimensions[feature.index()]
    }

    pub fn distance_to(&self, other: &FeatureVector) -> f64 {
        euclidean_distance(&self.dimensions, &other.dimensions)
    }
}

pub fn euclidean_distance(a: &[f64; NUM_FEATURES], b: &[f64; NUM_FEATURES]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Every vector in the store, one slot per id in `1..=max_id`.
///
/// Ids are assumed densely allocated, but the analyzer may have removed songs,
/// so any slot can be empty.
#[derive(Debug, Clone, Default)]
pub struct FeatureLibrary {
    slots: Vec<Option<FeatureVector>>,
}

impl FeatureLibrary {
    pub fn max_id(&self) -> i64 {
        self.slots.len() as i64
    }

    pub fn get(&self, feature_id: i64) -> Option<&FeatureVector> {
        if feature_id < 1 {
            return None;
        }
        self.slots
            .get((feature_id - 1) as usize)
            .and_then(Option::as_ref)
    }

    /// Present vectors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureVector> {
        self.slots.iter().flatten()
    }

    pub fn present(&self) -> usize {
        self.iter().count()
    }
}

impl FromIterator<FeatureVector> for FeatureLibrary {
    fn from_iter<I: IntoIterator<Item = FeatureVector>>(iter: I) -> Self {
        let mut slots: Vec<Option<FeatureVector>> = Vec::new();
        for vector in iter {
            if vector.feature_id < 1 {
                continue;
            }
            let idx = (vector.feature_id - 1) as usize;
            if idx >= slots.len() {
                slots.resize(idx + 1, None);
            }
            slots[idx] = Some(vector);
        }
        Self { slots }
    }
}

/// A row of the `song` relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSong {
    pub feature_id: i64,
    /// Absolute path as the analyzer stored it.
    pub path: String,
}

pub struct FeatureStore {
    conn: Connection,
}

impl FeatureStore {
    /// Open the analyzer database read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            WorfError::store(format!(
                "could not open feature store at {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection. Used by tests that build the store in memory.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Feature id of the song stored under `absolute_path`, if any.
    pub fn lookup_id_by_path(&self, absolute_path: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM song WHERE path = ?1",
                [absolute_path],
                |row| row.get(0),
            )
            .optional()?;
        debug!("Feature id for {absolute_path}: {id:?}");
        Ok(id)
    }

    /// Absolute path of the song with `feature_id`, if any.
    pub fn path_for_id(&self, feature_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT path FROM song WHERE id = ?1",
                [feature_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Fetch a single song's vector.
    ///
    /// # Errors
    ///
    /// * [`WorfError::NotFound`] if the song has no feature rows
    /// * [`WorfError::Store`] if the rows are malformed or incomplete
    pub fn fetch_vector(&self, feature_id: i64) -> Result<FeatureVector> {
        let mut stmt = self
            .conn
            .prepare("SELECT feature_index, feature FROM feature WHERE song_id = ?1")?;
        let rows = stmt.query_map([feature_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut dimensions = [0.0; NUM_FEATURES];
        let mut mask = 0u32;
        for row in rows {
            let (index, value) = row?;
            let index = checked_feature_index(feature_id, index)?;
            dimensions[index] = value;
            mask |= 1 << index;
        }

        if mask == 0 {
            return Err(WorfError::NotFound(format!(
                "no features for song id {feature_id}"
            )));
        }
        if mask != COMPLETE_MASK {
            return Err(WorfError::store(format!(
                "song id {feature_id} has {} of {NUM_FEATURES} features",
                mask.count_ones()
            )));
        }

        Ok(FeatureVector {
            feature_id,
            dimensions,
        })
    }

    /// Highest assigned song id, or 0 for an empty store.
    pub fn max_id(&self) -> Result<i64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT max(id) FROM song", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    /// Songs addressable by feature id, i.e. with an id of at least 1.
    pub fn song_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM song WHERE id >= 1", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Load every vector in one pass.
    ///
    /// Allocates one slot per id from 1 to [`FeatureStore::max_id`]. Songs with
    /// missing, partial or out-of-range feature rows are left as holes.
    pub fn fetch_all(&self) -> Result<FeatureLibrary> {
        let max_id = self.max_id()?;
        let slot_count = usize::try_from(max_id.max(0))
            .map_err(|_| WorfError::Allocation { requested: usize::MAX })?;

        let mut slots: Vec<Option<FeatureVector>> = Vec::new();
        slots
            .try_reserve_exact(slot_count)
            .map_err(|_| WorfError::Allocation {
                requested: slot_count,
            })?;
        slots.resize(slot_count, None);
        let mut masks = vec![0u32; slot_count];
        let mut malformed = vec![false; slot_count];

        let mut stmt = self.conn.prepare(
            "SELECT f.song_id, f.feature_index, f.feature
             FROM feature f JOIN song s ON s.id = f.song_id
             ORDER BY f.song_id, f.feature_index",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        for row in rows {
            let (song_id, index, value) = row?;
            if song_id < 1 || song_id > max_id {
                return Err(WorfError::store(format!(
                    "feature row for song id {song_id} outside 1..={max_id}"
                )));
            }
            let slot = (song_id - 1) as usize;
            let index = match checked_feature_index(song_id, index) {
                Ok(index) => index,
                Err(e) => {
                    if !malformed[slot] {
                        warn!("{e}, leaving it out");
                    }
                    malformed[slot] = true;
                    continue;
                }
            };
            let vector = slots[slot].get_or_insert_with(|| FeatureVector {
                feature_id: song_id,
                dimensions: [0.0; NUM_FEATURES],
            });
            vector.dimensions[index] = value;
            masks[slot] |= 1 << index;
        }

        for ((slot, mask), malformed) in slots.iter_mut().zip(masks).zip(malformed) {
            if malformed {
                *slot = None;
            } else if let Some(vector) = slot {
                if mask != COMPLETE_MASK {
                    warn!(
                        "Song id {} has {} of {NUM_FEATURES} features, leaving it out",
                        vector.feature_id,
                        mask.count_ones()
                    );
                    *slot = None;
                }
            }
        }

        let library = FeatureLibrary { slots };
        debug!(
            "Loaded {} feature vectors for ids 1..={max_id}",
            library.present()
        );
        Ok(library)
    }

    /// Songs whose lowercased path matches the GLOB `pattern`.
    ///
    /// The pattern is lowercased too, so matching is case-insensitive.
    pub fn search_glob(&self, pattern: &str) -> Result<Vec<FeatureSong>> {
        if pattern.is_empty() {
            return Err(WorfError::InvalidInput(
                "glob pattern cannot be empty".to_string(),
            ));
        }
        let mut stmt = self
            .conn
            .prepare("SELECT id, path FROM song WHERE lower(path) GLOB ?1 ORDER BY id")?;
        let songs = stmt
            .query_map([pattern.to_lowercase()], |row| {
                Ok(FeatureSong {
                    feature_id: row.get(0)?,
                    path: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(songs)
    }
}

fn checked_feature_index(song_id: i64, index: i64) -> Result<usize> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < NUM_FEATURES)
        .ok_or_else(|| {
            WorfError::store(format!(
                "song id {song_id} has feature_index {index} outside 0..{NUM_FEATURES}"
            ))
        })
}
