//! Persistent store for the user -> timezone mapping.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read timezone data: {0}")]
    Read(#[source] std::io::Error),
    #[error("Failed to serialize timezone data: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to write timezone data: {0}")]
    Write(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Maps Discord user IDs (as decimal strings) to IANA zone names.
///
/// Entries are only ever written after the zone resolved against the
/// catalog, but a later tzdata change can still make a stored name fail to
/// resolve at query time. That case is handled by the command layer.
pub struct TimezoneRegistry {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl TimezoneRegistry {
    /// Loads the snapshot at `path`. A missing file yields an empty
    /// registry; a file that exists but does not parse also yields an
    /// empty registry and is left in place for inspection. Any other read
    /// failure is fatal so the operator can decide what to do with the
    /// snapshot.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not parse timezone data, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No saved timezone data found");
                HashMap::new()
            }
            Err(e) => return Err(RegistryError::Read(e)),
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, uid: &str) -> Option<&str> {
        self.entries.get(uid).map(String::as_str)
    }

    /// Overwrites any previous entry. The caller must have resolved
    /// `zone` against the catalog first.
    pub fn set(&mut self, uid: &str, zone: &str) {
        self.entries.insert(uid.to_string(), zone.to_string());
    }

    /// Writes the whole mapping to a sibling temp file and renames it over
    /// the snapshot, so a crash mid-write keeps the previous good copy.
    pub fn save(&self) -> Result<()> {
        let content =
            serde_json::to_string_pretty(&self.entries).map_err(RegistryError::Serialize)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(RegistryError::Write)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(RegistryError::Write)?;
        fs::rename(&tmp, &self.path).map_err(RegistryError::Write)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file() {
        let dir = TempDir::new().unwrap();
        let registry = TimezoneRegistry::load(dir.path().join("timezones.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn load_corrupt_file_starts_empty_and_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timezones.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{ not json").unwrap();

        let registry = TimezoneRegistry::load(&path).unwrap();
        assert!(registry.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn set_and_get() {
        let dir = TempDir::new().unwrap();
        let mut registry = TimezoneRegistry::load(dir.path().join("timezones.json")).unwrap();

        registry.set("123", "Europe/Berlin");
        assert_eq!(registry.get("123"), Some("Europe/Berlin"));
        assert_eq!(registry.get("999"), None);

        registry.set("123", "Asia/Tokyo");
        assert_eq!(registry.get("123"), Some("Asia/Tokyo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timezones.json");

        let mut registry = TimezoneRegistry::load(&path).unwrap();
        registry.set("123", "Europe/Berlin");
        registry.set("456", "America/New_York");
        registry.save().unwrap();

        let reloaded = TimezoneRegistry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("123"), Some("Europe/Berlin"));
        assert_eq!(reloaded.get("456"), Some("America/New_York"));
    }

    #[test]
    fn save_creates_directory_and_cleans_up_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("timezones.json");

        let mut registry = TimezoneRegistry::load(&path).unwrap();
        registry.set("123", "UTC");
        registry.save().unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
