//! Settings directories and their JSON files
//!
//! Two scopes: the user-wide directory (`$TETHER_HOME`, else
//! `<config dir>/tether/`) and a project's `.tether/` directory, found by
//! walking up from a starting path. Writes go through a temp file in the
//! same directory and are renamed into place.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Name of the per-project directory
pub const PROJECT_DIR: &str = ".tether";

/// Environment variable overriding the user-wide directory
pub const HOME_ENV: &str = "TETHER_HOME";

/// A settings directory holding JSON files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// User-wide settings
    pub fn global() -> Result<Self> {
        global_dir(std::env::var_os(HOME_ENV)).map(Self::new)
    }

    /// `<root>/.tether/`, whether or not it exists yet
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(PROJECT_DIR))
    }

    /// Nearest `.tether/` at or above `start`
    pub fn discover(start: &Path) -> Option<Self> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_DIR))
            .find(|candidate| candidate.is_dir())
            .map(Self::new)
    }

    /// Discovered from the working directory, else rooted there
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::discover(&cwd).unwrap_or_else(|| Self::project(cwd)))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory the project store belongs to
    pub fn project_root(&self) -> Option<&Path> {
        match self.base_dir.file_name() {
            Some(name) if name == PROJECT_DIR => self.base_dir.parent(),
            _ => None,
        }
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// Parse `filename`; `None` when it does not exist
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        trace!(path = %path.display(), "settings file read");
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Parse `filename`, which must exist
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        self.load_optional(filename)?.ok_or_else(|| {
            Error::Config(format!("Missing {}", self.file_path(filename).display()))
        })
    }

    /// Replace `filename` atomically, creating the directory as needed
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            Error::Config(format!("Failed to create {}: {}", self.base_dir.display(), e))
        })?;
        let path = self.file_path(filename);
        let mut content = serde_json::to_vec_pretty(data)
            .map_err(|e| Error::Config(format!("Failed to serialize {}: {}", filename, e)))?;
        content.push(b'\n');

        let write_failed =
            |e: std::io::Error| Error::Config(format!("Failed to write {}: {}", path.display(), e));
        let mut staged = tempfile::NamedTempFile::new_in(&self.base_dir).map_err(write_failed)?;
        staged.write_all(&content).map_err(write_failed)?;
        staged.persist(&path).map_err(|e| write_failed(e.error))?;
        Ok(())
    }
}

fn global_dir(home_override: Option<OsString>) -> Result<PathBuf> {
    if let Some(home) = home_override.filter(|home| !home.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::config_dir()
        .map(|dir| dir.join("tether"))
        .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::project(dir.path());

        assert!(store.load_optional::<Sample>("sample.json").unwrap().is_none());
        assert!(matches!(store.load::<Sample>("sample.json"), Err(Error::Config(_))));

        store.save("sample.json", &Sample { value: 3 }).unwrap();
        store.save("sample.json", &Sample { value: 4 }).unwrap();
        assert_eq!(store.load::<Sample>("sample.json").unwrap(), Sample { value: 4 });

        // Only the target file is left behind
        let entries = std::fs::read_dir(store.base_dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        std::fs::write(store.file_path("broken.json"), "{ nope").unwrap();

        let err = store.load_optional::<Sample>("broken.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("src").join("bin");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(JsonStore::discover(&nested), None);

        std::fs::create_dir(dir.path().join(PROJECT_DIR)).unwrap();
        let found = JsonStore::discover(&nested).unwrap();
        assert_eq!(found, JsonStore::project(dir.path()));
        assert_eq!(found.project_root(), Some(dir.path()));
    }

    #[test]
    fn test_global_dir_override() {
        assert_eq!(
            global_dir(Some(OsString::from("/opt/tether"))).unwrap(),
            PathBuf::from("/opt/tether")
        );
        if let Ok(default) = global_dir(Some(OsString::new())) {
            assert!(default.ends_with("tether"));
        }
        assert_eq!(JsonStore::new("/opt/tether").project_root(), None);
    }
}
