//! # Path Translation Module
//!
//! This module translates between the feature store's absolute file paths and
//! MPD's URIs, which are relative to MPD's music directory. It also handles the
//! quote escaping used for paths kept in the library cache.
//!
//! ## Usage
//!
//! ```
//! use worf::path_translator::PathTranslator;
//!
//! let translator = PathTranslator::new("/home/user/Music")?;
//!
//! let mpd_path = translator.to_relative("/home/user/Music/artist/song.flac")?;
//! assert_eq!(mpd_path, "artist/song.flac");
//!
//! let abs_path = translator.to_absolute("artist/song.flac");
//! assert_eq!(abs_path, "/home/user/Music/artist/song.flac");
//!
//! assert_eq!(translator.to_storage("Don't Stop.flac")?, "Don''t Stop.flac");
//! # Ok::<(), worf::error::WorfError>(())
//! ```

use crate::error::{Result, WorfError};
use log::debug;
use path_absolutize::Absolutize;
use std::path::Path;

/// Replace every occurrence of `pattern` in `input` with `replacement`.
///
/// Empty input and empty patterns are rejected rather than passed through, so a
/// caller never mistakes "nothing to do" for "nothing matched".
pub fn replace_all(input: &str, pattern: &str, replacement: &str) -> Result<String> {
    if input.is_empty() || pattern.is_empty() {
        return Err(WorfError::InvalidInput(
            "empty string or pattern not supported".to_string(),
        ));
    }
    Ok(input.replace(pattern, replacement))
}

/// Converts paths between the feature store and MPD for one library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    /// Absolute root, always ending in `/`.
    library_root: String,
}

impl PathTranslator {
    /// Build a translator for `library_root`.
    ///
    /// Relative roots are resolved against the current directory and a trailing
    /// `/` is appended when missing, so prefix stripping always yields a clean
    /// relative URI.
    pub fn new(library_root: impl AsRef<Path>) -> Result<Self> {
        let root = library_root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(WorfError::InvalidInput(
                "library root cannot be empty".to_string(),
            ));
        }

        let absolute = root.absolutize()?;
        let mut library_root = absolute
            .to_str()
            .ok_or_else(|| {
                WorfError::InvalidInput(format!(
                    "library root is not valid UTF-8: {}",
                    absolute.display()
                ))
            })?
            .to_string();

        if !library_root.ends_with('/') {
            library_root.push('/');
        }

        debug!("Path translator using library root {library_root}");
        Ok(Self { library_root })
    }

    pub fn library_root(&self) -> &str {
        &self.library_root
    }

    /// Strip the library root from an absolute feature-store path.
    ///
    /// # Errors
    ///
    /// * [`WorfError::PrefixMismatch`] if `absolute_path` is outside the root
    /// * [`WorfError::InvalidInput`] if the path is exactly the root
    pub fn to_relative(&self, absolute_path: &str) -> Result<String> {
        let relative = absolute_path
            .strip_prefix(&self.library_root)
            .ok_or_else(|| WorfError::PrefixMismatch {
                path: absolute_path.to_string(),
                root: self.library_root.clone(),
            })?;

        if relative.is_empty() {
            return Err(WorfError::InvalidInput(format!(
                "'{absolute_path}' is the library root itself, not a track"
            )));
        }

        Ok(relative.to_string())
    }

    /// Prepend the library root to an MPD relative URI.
    pub fn to_absolute(&self, relative_path: &str) -> String {
        format!("{}{}", self.library_root, relative_path)
    }

    /// Escape a path for storage by doubling every single quote.
    pub fn to_storage(&self, path: &str) -> Result<String> {
        replace_all(path, "'", "''")
    }

    /// Undo [`PathTranslator::to_storage`].
    pub fn from_storage(&self, escaped: &str) -> String {
        escaped.replace("''", "'")
    }
}
