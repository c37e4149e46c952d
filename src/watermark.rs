//! Persisted timestamp of the last sync run.
//!
//! The file holds a single integer of Unix seconds. It is overwritten with the
//! current time when a run *starts*, so a run that dies halfway still counts as
//! synced up to that moment on the next invocation.

use crate::error::Result;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
}

impl Watermark {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded timestamp. A missing, empty, unparseable or zero file all
    /// mean the library has never been synced.
    pub fn read(&self) -> Result<Option<i64>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = contents.trim().parse::<i64>().ok().filter(|ts| *ts != 0);
        debug!("Watermark at {}: {value:?}", self.path.display());
        Ok(value)
    }

    pub fn write(&self, timestamp: i64) -> Result<()> {
        fs::write(&self.path, timestamp.to_string())?;
        Ok(())
    }

    /// Read the previous value and replace it with the current time.
    pub fn advance(&self) -> Result<Option<i64>> {
        let previous = self.read()?;
        self.write(now())?;
        Ok(previous)
    }
}

/// Current Unix time in seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
