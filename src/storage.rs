//! Storage root and atomic file helpers
//!
//! Every persistent artifact lives under a single storage root, resolved
//! once at startup and passed explicitly to components. All whole-file
//! writes go through write-temp-then-rename so readers in other processes
//! only ever observe complete documents.

use crate::error::CoachError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the default storage root
pub const STORAGE_ROOT_ENV: &str = "STORAGE_ROOT";

/// Default storage directory relative to the working directory
pub const DEFAULT_STORAGE_DIR: &str = "storage";

/// Resolved locations of every on-disk artifact.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    /// Resolve the storage root: explicit override, then the
    /// `STORAGE_ROOT` environment variable, then `./storage`.
    pub fn resolve(override_root: Option<&Path>) -> Self {
        let root = override_root
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var_os(STORAGE_ROOT_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if missing.
    pub fn ensure(&self) -> Result<(), CoachError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn baseline(&self) -> PathBuf {
        self.root.join("calibration.json")
    }

    pub fn events(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn status(&self) -> PathBuf {
        self.root.join("status.json")
    }

    pub fn calibration_status(&self) -> PathBuf {
        self.root.join("calibration_status.json")
    }

    pub fn daemon_pidfile(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    pub fn daemon_meta(&self) -> PathBuf {
        self.root.join("daemon.meta.json")
    }

    pub fn calibration_lock(&self) -> PathBuf {
        self.root.join("calibration.lock")
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.root.join("daemon.log")
    }

    /// Drop file through which the UI or CLI delivers a notification
    /// action to the running daemon
    pub fn action_file(&self) -> PathBuf {
        self.root.join("action.json")
    }
}

/// Write `contents` to `path` atomically: serialize to `<path>.tmp` in the
/// same directory, then rename over the target.
pub fn atomic_write_str(path: &Path, contents: &str) -> Result<(), CoachError> {
    let tmp = tmp_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CoachError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write_str(path, &json)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        value: f64,
        label: String,
    }

    #[test]
    fn test_paths_live_under_root() {
        let paths = StoragePaths::at("/tmp/deskcoach-test");
        assert!(paths.status().starts_with("/tmp/deskcoach-test"));
        assert_eq!(paths.events().file_name().unwrap(), "events.jsonl");
        assert_eq!(paths.baseline().file_name().unwrap(), "calibration.json");
    }

    #[test]
    fn test_atomic_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            value: 8.4,
            label: "neck".to_string(),
        };

        atomic_write_json(&path, &doc).unwrap();

        let loaded: Doc = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, doc);
        // No temp file left behind
        assert!(!path.with_file_name("doc.json.tmp").exists());
    }

    #[test]
    fn test_atomic_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        atomic_write_str(&path, "{\"value\": 1.0, \"label\": \"long original contents\"}")
            .unwrap();
        atomic_write_str(&path, "{\"value\": 2.0}").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"value\": 2.0}");
    }

    #[test]
    fn test_resolve_prefers_explicit_override() {
        let paths = StoragePaths::resolve(Some(Path::new("/custom/root")));
        assert_eq!(paths.root(), Path::new("/custom/root"));
    }
}
