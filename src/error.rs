//! # Error Types
//!
//! Every fallible operation in the library returns [`Result`]. The variants map
//! onto the failure classes the sync and playlist code has to tell apart:
//! storage failures, remote player failures, path normalization failures,
//! cross-store divergence, allocation failure and plain lookup misses.

use thiserror::Error;

/// What the remote server said went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// The named object (usually a stored playlist) does not exist.
    NoExist,
    /// Anything else the server rejected.
    Other,
}

/// Failures talking to the remote music player.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The server answered, but with an error.
    #[error("MPD server error ({kind:?}): {message}")]
    Server {
        kind: ServerErrorKind,
        message: String,
    },
    /// The request never got a proper answer (connection, spawn, I/O).
    #[error("MPD transport error: {message}")]
    Transport { message: String },
}

impl RemoteError {
    pub fn is_no_exist(&self) -> bool {
        matches!(
            self,
            RemoteError::Server {
                kind: ServerErrorKind::NoExist,
                ..
            }
        )
    }
}

#[derive(Error, Debug)]
pub enum WorfError {
    #[error("Storage error: {message}")]
    Store { message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Path '{path}' does not start with library root '{root}'")]
    PrefixMismatch { path: String, root: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "Library cache and feature store disagree on feature id {feature_id}: \
         cache has '{cached}', feature store has '{expected}'"
    )]
    Divergence {
        feature_id: i64,
        cached: String,
        expected: String,
    },

    #[error("Could not allocate room for {requested} entries")]
    Allocation { requested: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for WorfError {
    fn from(err: rusqlite::Error) -> Self {
        WorfError::Store {
            message: err.to_string(),
        }
    }
}

impl WorfError {
    pub fn store(message: impl Into<String>) -> Self {
        WorfError::Store {
            message: message.into(),
        }
    }

    /// Operator advice for playlist submission failures, if any applies.
    ///
    /// MPD refuses to append to a stored playlist whose file it cannot find,
    /// which shows up as a "no such object" server error on `playlistadd`.
    pub fn remediation_hint(&self, playlist_name: &str) -> Option<String> {
        match self {
            WorfError::Remote(remote) if remote.is_no_exist() => Some(format!(
                "This probably means you need to touch ~/.mpd/playlists/{playlist_name}.m3u \
                 (or the equivalent for your setup) on the server running MPD"
            )),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_become_store_errors() {
        let err: WorfError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, WorfError::Store { .. }));
    }

    #[test]
    fn test_remediation_hint_only_for_missing_playlist() {
        let missing = WorfError::Remote(RemoteError::Server {
            kind: ServerErrorKind::NoExist,
            message: "No such playlist".to_string(),
        });
        let hint = missing.remediation_hint("bliss-playlist").unwrap();
        assert!(hint.contains("bliss-playlist.m3u"));

        let transport = WorfError::Remote(RemoteError::Transport {
            message: "Connection refused".to_string(),
        });
        assert!(transport.remediation_hint("bliss-playlist").is_none());
        assert!(WorfError::NotFound("x".into()).remediation_hint("p").is_none());
    }
}
