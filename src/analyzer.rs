//! Runs the external feature extractor (`blissify update`) so the feature
//! store covers tracks added to MPD since the last analysis.

use crate::error::{Result, WorfError};
use log::info;
use std::process::Command;

/// How to reach MPD from the analyzer's point of view.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub program: String,
    pub host: String,
    pub port: u16,
    /// Password for MPD as the analyzer sees it, if it differs from ours.
    pub password: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            program: "blissify".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6600,
            password: None,
        }
    }
}

impl AnalyzerConfig {
    /// Value exported as `MPD_HOST` to the analyzer.
    fn mpd_host(&self) -> String {
        match &self.password {
            Some(password) => format!("{password}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("update")
            .env("MPD_HOST", self.mpd_host())
            .env("MPD_PORT", self.port.to_string());
        cmd
    }
}

/// Run `<program> update` and wait for it. A non-zero exit aborts the run.
pub fn run_update(config: &AnalyzerConfig) -> Result<()> {
    println!("Running `{} update`...", config.program);
    let status = config.command().status().map_err(|e| {
        WorfError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to start `{} update`: {e}", config.program),
        ))
    })?;

    if !status.success() {
        return Err(WorfError::Io(std::io::Error::other(format!(
            "`{} update` failed with {status}",
            config.program
        ))));
    }

    info!("Feature store updated by {}", config.program);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpd_host_with_password() {
        let config = AnalyzerConfig {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert_eq!(config.mpd_host(), "hunter2@127.0.0.1");
        assert_eq!(AnalyzerConfig::default().mpd_host(), "127.0.0.1");
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let config = AnalyzerConfig {
            program: "worf-test-no-such-analyzer".to_string(),
            ..Default::default()
        };
        assert!(matches!(run_update(&config), Err(WorfError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_io_error() {
        let config = AnalyzerConfig {
            program: "false".to_string(),
            ..Default::default()
        };
        match run_update(&config) {
            Err(WorfError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::Other);
                assert!(e.to_string().contains("`false update` failed"));
            }
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }
}
