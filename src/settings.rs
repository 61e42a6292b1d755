//! Persisted pond size.
//!
//! Stored as JSON (`{"PondSize": 4}`). A missing file means defaults; a size
//! outside `3..=4` is clamped on load.

use crate::atomic;
use crate::compute::ConfigRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const MIN_POND_SIZE: i32 = 3;
pub const MAX_POND_SIZE: i32 = 4;
pub const DEFAULT_POND_SIZE: i32 = 4;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to access settings file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed settings file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    #[serde(default = "default_pond_size")]
    pub pond_size: i32,
}

fn default_pond_size() -> i32 {
    DEFAULT_POND_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pond_size: DEFAULT_POND_SIZE,
        }
    }
}

impl Settings {
    /// Read settings from `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        let clamped = settings.clamped();
        if clamped != settings {
            warn!(
                requested = settings.pond_size,
                used = clamped.pond_size,
                "pond size out of range"
            );
        }
        Ok(clamped)
    }

    /// Write to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        json.push('\n');
        atomic::write(path, json.as_bytes()).map_err(io_err)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clamped(self) -> Self {
        Self {
            pond_size: self.pond_size.clamp(MIN_POND_SIZE, MAX_POND_SIZE),
        }
    }

    /// The square footprint the value computers work from.
    pub fn config(&self) -> ConfigRecord {
        ConfigRecord::square(self.clamped().pond_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.config(), ConfigRecord::square(4));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Settings { pond_size: 3 }.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"PondSize\": 3"));
        assert_eq!(Settings::load(&path).unwrap().pond_size, 3);
    }

    #[test]
    fn out_of_range_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"PondSize": 9}"#).unwrap();
        assert_eq!(Settings::load(&path).unwrap().pond_size, 4);
        fs::write(&path, r#"{"PondSize": 1}"#).unwrap();
        assert_eq!(Settings::load(&path).unwrap().pond_size, 3);
    }

    #[test]
    fn empty_object_uses_default_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{}").unwrap();
        assert_eq!(Settings::load(&path).unwrap().pond_size, DEFAULT_POND_SIZE);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ PondSize: ").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn reset_restores_default() {
        let mut settings = Settings { pond_size: 3 };
        settings.reset();
        assert_eq!(settings.pond_size, DEFAULT_POND_SIZE);
    }
}
