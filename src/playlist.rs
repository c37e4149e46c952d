//! # Playlist Generator
//!
//! Builds a stored playlist on MPD from the feature store's song set, either by
//! random sampling or by acoustic similarity to a base song.
//!
//! Both strategies materialize the full list of MPD URIs first and only then
//! touch the player: the target playlist is deleted (a missing playlist is
//! fine) and the tracks are appended in order. The first rejected append stops
//! the build.
//!
//! ## Similarity ordering
//!
//! Songs are ordered by Euclidean distance from the base vector, but distances
//! closer than [`SimilarityConfig::epsilon`] count as equal so that analyzer
//! noise does not decide the order of near-identical tracks. Such a comparator
//! is not transitive, so [`rank_by_similarity`] sorts by exact distance and then
//! puts each epsilon cluster back into feature id order, which is the order a
//! stable sort with the fuzzy comparator would leave them in.

use crate::db::LibraryCache;
use crate::error::{Result, WorfError};
use crate::feature_store::{FeatureLibrary, FeatureStore, FeatureVector};
use crate::mpd_client::RemoteSource;
use crate::path_translator::PathTranslator;
use log::{debug, info, warn};
use rand::{thread_rng, Rng};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::{BufRead, Write};

/// Distances closer than this are treated as ties.
pub const DEFAULT_EPSILON: f64 = 0.05;

pub const DEFAULT_PLAYLIST_LENGTH: usize = 50;
pub const DEFAULT_PLAYLIST_NAME: &str = "bliss-playlist";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityConfig {
    pub epsilon: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

/// Order two distances, treating any pair closer than `epsilon` as equal.
pub fn compare_within_epsilon(a: f64, b: f64, epsilon: f64) -> Ordering {
    if (a - b).abs() < epsilon {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Rank every vector in `library` by distance from `base`, nearest first.
///
/// Returns `(feature_id, distance)` pairs. Holes in the library are left out and
/// the base song itself is included, usually at the front.
pub fn rank_by_similarity(
    base: &FeatureVector,
    library: &FeatureLibrary,
    epsilon: f64,
) -> Vec<(i64, f64)> {
    let mut ranked: Vec<(i64, f64)> = library
        .iter()
        .map(|vector| (vector.feature_id, base.distance_to(vector)))
        .collect();
    ranked.sort_by(|(_, a), (_, b)| a.total_cmp(b));

    let mut start = 0;
    while start < ranked.len() {
        let anchor = ranked[start].1;
        let end = ranked[start..]
            .iter()
            .position(|(_, d)| compare_within_epsilon(*d, anchor, epsilon) != Ordering::Equal)
            .map_or(ranked.len(), |offset| start + offset);
        ranked[start..end].sort_by_key(|(id, _)| *id);
        start = end;
    }

    ranked
}

pub struct PlaylistGenerator<'a> {
    features: &'a FeatureStore,
    cache: &'a LibraryCache,
    translator: &'a PathTranslator,
    remote: &'a dyn RemoteSource,
    similarity: SimilarityConfig,
}

impl<'a> PlaylistGenerator<'a> {
    pub fn new(
        features: &'a FeatureStore,
        cache: &'a LibraryCache,
        translator: &'a PathTranslator,
        remote: &'a dyn RemoteSource,
    ) -> Self {
        Self {
            features,
            cache,
            translator,
            remote,
            similarity: SimilarityConfig::default(),
        }
    }

    pub fn with_similarity(mut self, similarity: SimilarityConfig) -> Self {
        self.similarity = similarity;
        self
    }

    /// Submit `n` distinct random songs as playlist `name`.
    ///
    /// Returns the submitted URIs in order.
    pub fn random(&self, name: &str, n: usize) -> Result<Vec<String>> {
        self.random_with_rng(name, n, &mut thread_rng())
    }

    pub fn random_with_rng<R: Rng>(
        &self,
        name: &str,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        check_request(name, n)?;

        let max_id = self.features.max_id()?;
        if max_id < 1 {
            return Err(WorfError::InvalidInput(
                "feature store has no songs with a positive id".to_string(),
            ));
        }
        let available = self.features.song_count()?;
        let n = if n > available {
            warn!("Only {available} songs available, shortening playlist from {n}");
            available
        } else {
            n
        };

        let mut chosen: Vec<i64> = Vec::with_capacity(n);
        let mut seen: HashSet<i64> = HashSet::with_capacity(n);
        let mut holes: HashSet<i64> = HashSet::new();
        let mut paths = Vec::with_capacity(n);

        while chosen.len() < n {
            let candidate = rng.gen_range(1..=max_id);
            if seen.contains(&candidate) || holes.contains(&candidate) {
                continue;
            }
            match self.resolve_path(candidate)? {
                Some(path) => {
                    seen.insert(candidate);
                    chosen.push(candidate);
                    paths.push(path);
                }
                None => {
                    debug!("No song with feature id {candidate}");
                    holes.insert(candidate);
                }
            }
        }

        info!("Picked {} random songs: {chosen:?}", chosen.len());
        self.submit(name, &paths)?;
        Ok(paths)
    }

    /// Submit the `n` songs closest to `base_id` as playlist `name`.
    ///
    /// Returns the submitted URIs in ranked order.
    pub fn similar_to(&self, name: &str, base_id: i64, n: usize) -> Result<Vec<String>> {
        check_request(name, n)?;

        let base = self.features.fetch_vector(base_id)?;
        let library = self.features.fetch_all()?;
        println!(
            "Ranking {} songs by similarity to feature id {base_id}",
            library.present()
        );

        let ranked = rank_by_similarity(&base, &library, self.similarity.epsilon);
        let mut paths = Vec::with_capacity(n.min(ranked.len()));
        for (feature_id, distance) in ranked.into_iter().take(n) {
            let path = self.resolve_path(feature_id)?.ok_or_else(|| {
                WorfError::NotFound(format!("no path for feature id {feature_id}"))
            })?;
            debug!("{distance:.4} {path}");
            paths.push(path);
        }

        self.submit(name, &paths)?;
        Ok(paths)
    }

    /// MPD URI for `feature_id`: the cached path if the cache has one, else the
    /// feature store's path made relative. `None` if neither store knows the id.
    fn resolve_path(&self, feature_id: i64) -> Result<Option<String>> {
        if let Some(stored) = self.cache.path_for_feature_id(feature_id)? {
            return Ok(Some(self.translator.from_storage(&stored)));
        }
        match self.features.path_for_id(feature_id)? {
            Some(absolute) => Ok(Some(self.translator.to_relative(&absolute)?)),
            None => Ok(None),
        }
    }

    /// Replace playlist `name` on the player with `paths`.
    fn submit(&self, name: &str, paths: &[String]) -> Result<()> {
        match self.remote.remove_playlist(name) {
            Ok(()) => debug!("Removed old playlist {name}"),
            Err(e) if e.is_no_exist() => debug!("Playlist {name} did not exist yet"),
            Err(e) => return Err(e.into()),
        }

        for path in paths {
            self.remote.playlist_add(name, path)?;
        }

        info!("Playlist {name} now holds {} songs", paths.len());
        Ok(())
    }
}

fn check_request(name: &str, n: usize) -> Result<()> {
    if name.is_empty() {
        return Err(WorfError::InvalidInput(
            "playlist name cannot be empty".to_string(),
        ));
    }
    if n == 0 {
        return Err(WorfError::InvalidInput(
            "playlist length must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// List songs matching `pattern` on `output` and read the operator's choice
/// from `input`. Returns the chosen feature id.
///
/// Songs are numbered from 0. Keeps prompting until a listed number is entered.
///
/// # Errors
///
/// * [`WorfError::NotFound`] if nothing matches
/// * [`WorfError::InvalidInput`] if `input` ends before a choice is made
pub fn select_from_glob<R: BufRead, W: Write>(
    store: &FeatureStore,
    translator: &PathTranslator,
    pattern: &str,
    mut input: R,
    mut output: W,
) -> Result<i64> {
    let songs = store.search_glob(pattern)?;
    if songs.is_empty() {
        return Err(WorfError::NotFound(format!("no songs match '{pattern}'")));
    }

    for (i, song) in songs.iter().enumerate() {
        let shown = translator
            .to_relative(&song.path)
            .unwrap_or_else(|_| song.path.clone());
        writeln!(output, "{i:>3}: {shown}")?;
    }

    let mut line = String::new();
    loop {
        write!(output, "Select a song [0-{}]: ", songs.len() - 1)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(WorfError::InvalidInput("no song selected".to_string()));
        }

        match line.trim().parse::<usize>() {
            Ok(choice) if choice < songs.len() => return Ok(songs[choice].feature_id),
            _ => writeln!(output, "Invalid selection '{}'", line.trim())?,
        }
    }
}
