//! # Library Cache
//!
//! Local SQLite mirror of MPD's track list. One row per track, keyed by its
//! (storage-escaped) MPD URI and cross-referenced to the feature store:
//!
//! ```text
//! entities(type, path PRIMARY KEY, added_time, modified_time, feature_id UNIQUE)
//! ```
//!
//! Rows are only ever inserted; a full resync drops and recreates the table.
//! A track the feature store does not know yet is stored with a NULL
//! `feature_id`, so any number of them can coexist under the UNIQUE constraint.

use crate::error::{Result, WorfError};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

const CREATE_ENTITIES: &str = "CREATE TABLE IF NOT EXISTS entities (
    type          INTEGER NOT NULL,
    path          TEXT    PRIMARY KEY,
    added_time    INTEGER NOT NULL,
    modified_time INTEGER NOT NULL,
    feature_id    INTEGER UNIQUE
)";

const SELECT_ENTRY: &str = "SELECT type, path, added_time, modified_time, feature_id FROM entities";

/// Kind of cached entity. Only tracks are synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Track,
}

impl EntryKind {
    fn code(self) -> i64 {
        match self {
            EntryKind::Track => 1,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EntryKind::Track),
            _ => None,
        }
    }
}

/// One cached track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub kind: EntryKind,
    /// Unix seconds MPD reports the track was added.
    pub added_time: i64,
    /// Unix seconds of the file's last modification.
    pub modified_time: i64,
    /// MPD relative URI, storage-escaped.
    pub path: String,
    pub feature_id: Option<i64>,
}

impl LibraryEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let code: i64 = row.get(0)?;
        let kind = EntryKind::from_code(code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Integer,
                format!("unknown entity type {code}").into(),
            )
        })?;
        Ok(Self {
            kind,
            path: row.get(1)?,
            added_time: row.get(2)?,
            modified_time: row.get(3)?,
            feature_id: row.get(4)?,
        })
    }
}

pub struct LibraryCache {
    conn: Connection,
}

impl LibraryCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            WorfError::store(format!(
                "could not open library cache at {}: {e}",
                path.display()
            ))
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(CREATE_ENTITIES, [])?;
        Ok(Self { conn })
    }

    /// Drop and recreate the table.
    pub fn reset(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS entities; {CREATE_ENTITIES};"))?;
        info!("Library cache cleared");
        Ok(())
    }

    pub fn contains_path(&self, path: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM entities WHERE path = ?1", [path], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn entry_by_path(&self, path: &str) -> Result<Option<LibraryEntry>> {
        Ok(self
            .conn
            .query_row(
                &format!("{SELECT_ENTRY} WHERE path = ?1"),
                [path],
                LibraryEntry::from_row,
            )
            .optional()?)
    }

    /// Cached (escaped) path for `feature_id`, if any.
    pub fn path_for_feature_id(&self, feature_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT path FROM entities WHERE feature_id = ?1",
                [feature_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Insert one row. Each insert is its own atomic statement.
    pub fn insert(&self, entry: &LibraryEntry) -> Result<()> {
        debug!("Caching {} (feature id {:?})", entry.path, entry.feature_id);
        self.conn
            .execute(
                "INSERT INTO entities (type, path, added_time, modified_time, feature_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    entry.kind.code(),
                    &entry.path,
                    entry.added_time,
                    entry.modified_time,
                    entry.feature_id,
                ),
            )
            .map_err(|e| WorfError::store(format!("insert of '{}' failed: {e}", entry.path)))?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All rows, ordered by path. Mostly useful for listing and tests.
    pub fn entries(&self) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_ENTRY} ORDER BY path"))?;
        let entries = stmt
            .query_map([], LibraryEntry::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Hand every row with a feature id, in ascending feature id order, to `f`
    /// as a single-pass iterator of decoded entries.
    ///
    /// The cache may be written to from inside `f`.
    pub fn scan_by_feature_id<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Iterator<Item = Result<LibraryEntry>>) -> Result<T>,
    {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_ENTRY} WHERE feature_id IS NOT NULL ORDER BY feature_id"
        ))?;
        let mut rows = stmt
            .query_map([], LibraryEntry::from_row)?
            .map(|row| row.map_err(WorfError::from));
        f(&mut rows)
    }
}
