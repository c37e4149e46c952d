//! # MPD Client Module
//!
//! The remote music source, seen through the [`RemoteSource`] trait. The sync
//! engine and playlist generator only ever talk to that trait, which keeps them
//! testable without a running MPD.
//!
//! ## Design Decision: mpc vs Direct Protocol
//!
//! [`MpcClient`] drives MPD through the `mpc` command-line tool rather than
//! speaking the protocol itself:
//! - Simplicity: No need to implement MPD protocol parsing
//! - Reliability: mpc is well-tested and handles edge cases
//! - Error Handling: mpc reports MPD's error messages on stderr
//!
//! Track listings are requested with a tab-separated `--format` so each output
//! line decodes straight into a [`RemoteTrack`]. mpc renders `%mtime%` with
//! `strftime("%c")`, so it always runs under the C locale and the dates are
//! parsed back into Unix seconds.

use crate::error::{RemoteError, ServerErrorKind};
use chrono::{DateTime, Local, NaiveDateTime};
use log::{debug, warn};
use std::process::Command;

/// `mpc --format` used for every track listing: URI, added time, mtime.
pub const TRACK_FORMAT: &str = "%file%\t%added%\t%mtime%";

/// A song as MPD reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// URI relative to MPD's music directory.
    pub uri: String,
    pub added_time: i64,
    pub modified_time: i64,
    /// mpc printed a time that could not be decoded; it was stored as 0.
    pub unreadable_time: bool,
}

/// Anything MPD's database listing can yield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEntity {
    Directory { path: String },
    Playlist { path: String },
    Track(RemoteTrack),
}

/// Operations consumed from the remote music player.
pub trait RemoteSource {
    /// Fail early with a transport error if the player is unreachable.
    fn check_connection(&self) -> Result<(), RemoteError>;

    /// Every entity in the player's database, in the player's order.
    fn list_all(&self) -> Result<Vec<RemoteEntity>, RemoteError>;

    /// Tracks added at or after `since` (Unix seconds).
    fn added_since(&self, since: i64) -> Result<Vec<RemoteTrack>, RemoteError>;

    /// Metadata for one track, if the player knows it.
    fn lookup_track(&self, uri: &str) -> Result<Option<RemoteTrack>, RemoteError>;

    /// Delete the stored playlist `name`.
    fn remove_playlist(&self, name: &str) -> Result<(), RemoteError>;

    /// Append `uri` to the stored playlist `name`.
    fn playlist_add(&self, name: &str, uri: &str) -> Result<(), RemoteError>;
}

/// Connection settings for `mpc`.
#[derive(Debug, Clone, Default)]
pub struct MpcClient {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

impl MpcClient {
    pub fn new(host: Option<String>, port: Option<u16>, password: Option<String>) -> Self {
        Self {
            host,
            port,
            password,
        }
    }

    /// `--host` value, with the password folded in the way mpc expects it.
    fn host_arg(&self) -> Option<String> {
        match (&self.password, &self.host) {
            (Some(password), Some(host)) => Some(format!("{password}@{host}")),
            (Some(password), None) => Some(format!("{password}@localhost")),
            (None, Some(host)) => Some(host.clone()),
            (None, None) => None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("mpc");
        cmd.env("LC_ALL", "C");
        if let Some(host) = self.host_arg() {
            cmd.arg(format!("--host={host}"));
        }
        if let Some(port) = self.port {
            cmd.arg(format!("--port={port}"));
        }
        cmd
    }

    /// Run mpc with `args` and return its stdout.
    fn run(&self, args: &[&str]) -> Result<String, RemoteError> {
        debug!("Running mpc {}", args.join(" "));
        let output = self
            .command()
            .args(args)
            .output()
            .map_err(|e| RemoteError::Transport {
                message: format!(
                    "failed to execute mpc ({e}). Please install mpc (MPD client)"
                ),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_mpc_error(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_tracks(&self, args: &[&str]) -> Result<Vec<RemoteTrack>, RemoteError> {
        let mut full_args = vec!["--format", TRACK_FORMAT];
        full_args.extend_from_slice(args);
        let stdout = self.run(&full_args)?;
        Ok(stdout.lines().filter_map(parse_track_line).collect())
    }
}

impl RemoteSource for MpcClient {
    fn check_connection(&self) -> Result<(), RemoteError> {
        self.run(&["version"]).map(|_| ())
    }

    fn list_all(&self) -> Result<Vec<RemoteEntity>, RemoteError> {
        Ok(self
            .run_tracks(&["listall"])?
            .into_iter()
            .map(RemoteEntity::Track)
            .collect())
    }

    fn added_since(&self, since: i64) -> Result<Vec<RemoteTrack>, RemoteError> {
        let filter = format!("(added-since '{since}')");
        self.run_tracks(&["search", &filter])
    }

    fn lookup_track(&self, uri: &str) -> Result<Option<RemoteTrack>, RemoteError> {
        Ok(self
            .run_tracks(&["find", "file", uri])?
            .into_iter()
            .find(|track| track.uri == uri))
    }

    fn remove_playlist(&self, name: &str) -> Result<(), RemoteError> {
        self.run(&["rm", name]).map(|_| ())
    }

    fn playlist_add(&self, name: &str, uri: &str) -> Result<(), RemoteError> {
        self.run(&["addplaylist", name, uri]).map(|_| ())
    }
}

/// Decode one line of [`TRACK_FORMAT`] output.
///
/// Blank lines yield `None`. A time mpc leaves empty decodes as 0; one that is
/// present but unreadable also decodes as 0 and marks the track.
pub fn parse_track_line(line: &str) -> Option<RemoteTrack> {
    let mut fields = line.split('\t');
    let uri = fields.next()?.trim_end_matches('\r');
    if uri.is_empty() {
        return None;
    }
    let added = parse_timestamp(fields.next());
    let modified = parse_timestamp(fields.next());
    let unreadable_time = added.is_none() || modified.is_none();
    if unreadable_time {
        warn!("mpc printed an unreadable time for {uri}, storing 0");
    }
    Some(RemoteTrack {
        uri: uri.to_string(),
        added_time: added.unwrap_or(0),
        modified_time: modified.unwrap_or(0),
        unreadable_time,
    })
}

/// `strftime("%c")` in the C locale, e.g. `Tue Nov 14 22:13:20 2023`, once the
/// space padding of single-digit days is collapsed.
const C_LOCALE_DATE: &str = "%a %b %d %H:%M:%S %Y";

/// Unix seconds for one time field. Empty means MPD has no value and gives 0;
/// `None` means the field could not be read.
fn parse_timestamp(field: Option<&str>) -> Option<i64> {
    let value = match field.map(str::trim) {
        None | Some("") => return Some(0),
        Some(value) => value,
    };

    if let Ok(seconds) = value.parse::<i64>() {
        return Some(seconds);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Ok(naive) = NaiveDateTime::parse_from_str(&collapsed, C_LOCALE_DATE) {
        // mpc formats with localtime(); an ambiguous DST hour takes the earlier instant.
        if let Some(dt) = naive.and_local_timezone(Local).earliest() {
            return Some(dt.timestamp());
        }
    }

    debug!("Unparseable timestamp '{value}'");
    None
}

/// Sort mpc's stderr into server-reported and transport-level failures.
pub fn classify_mpc_error(stderr: &str) -> RemoteError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    const TRANSPORT_MARKERS: &[&str] = &[
        "connection refused",
        "connection closed",
        "connection reset",
        "timeout",
        "timed out",
        "failed to resolve",
        "no route to host",
        "broken pipe",
        "network is unreachable",
    ];
    const NO_EXIST_MARKERS: &[&str] = &["no such", "not found", "does not exist"];

    if TRANSPORT_MARKERS.iter().any(|m| lower.contains(m)) {
        warn!("mpc could not reach MPD: {message}");
        RemoteError::Transport { message }
    } else if NO_EXIST_MARKERS.iter().any(|m| lower.contains(m)) {
        RemoteError::Server {
            kind: ServerErrorKind::NoExist,
            message,
        }
    } else {
        RemoteError::Server {
            kind: ServerErrorKind::Other,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_line() {
        let track = parse_track_line("Rock/It's.flac\t1700000000\t1600000000").unwrap();
        assert_eq!(track.uri, "Rock/It's.flac");
        assert_eq!(track.added_time, 1_700_000_000);
        assert_eq!(track.modified_time, 1_600_000_000);
    }

    #[test]
    fn test_parse_track_line_edge_cases() {
        assert!(parse_track_line("").is_none());
        assert!(parse_track_line("\t1\t2").is_none());

        let bare = parse_track_line("a.mp3").unwrap();
        assert_eq!((bare.added_time, bare.modified_time), (0, 0));

        assert!(!bare.unreadable_time);

        let odd = parse_track_line("a.mp3\tyesterday\t\r").unwrap();
        assert_eq!((odd.added_time, odd.modified_time), (0, 0));
        assert!(odd.unreadable_time);
    }

    #[test]
    fn test_parse_track_line_reads_mpc_dates() {
        let expected = NaiveDateTime::parse_from_str("2023-11-02 08:05:09", "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_local_timezone(Local)
            .earliest()
            .unwrap()
            .timestamp();

        // What `mpc --format '%file%\t%added%\t%mtime%'` prints under LC_ALL=C.
        let track = parse_track_line("Jazz/So What.flac\tThu Nov  2 08:05:09 2023\tThu Nov  2 08:05:09 2023")
            .unwrap();
        assert_eq!(track.added_time, expected);
        assert_eq!(track.modified_time, expected);
        assert!(!track.unreadable_time);

        let iso = parse_track_line("a.mp3\t2023-11-14T22:13:20Z\t1600000000").unwrap();
        assert_eq!(iso.added_time, 1_700_000_000);
        assert_eq!(iso.modified_time, 1_600_000_000);
        assert!(!iso.unreadable_time);
    }

    #[test]
    fn test_classify_errors() {
        assert!(classify_mpc_error("MPD error: No such playlist\n").is_no_exist());
        assert!(matches!(
            classify_mpc_error("MPD error: Connection refused"),
            RemoteError::Transport { .. }
        ));
        assert!(matches!(
            classify_mpc_error("MPD error: Timeout"),
            RemoteError::Transport { .. }
        ));
        assert_eq!(
            classify_mpc_error("MPD error: Permission denied"),
            RemoteError::Server {
                kind: ServerErrorKind::Other,
                message: "MPD error: Permission denied".to_string(),
            }
        );
    }

    #[test]
    fn test_host_arg_folds_password() {
        let client = MpcClient::new(Some("10.0.0.2".into()), Some(6601), Some("secret".into()));
        assert_eq!(client.host_arg().as_deref(), Some("secret@10.0.0.2"));

        let local = MpcClient::new(None, None, Some("secret".into()));
        assert_eq!(local.host_arg().as_deref(), Some("secret@localhost"));

        assert_eq!(MpcClient::default().host_arg(), None);
    }
}
