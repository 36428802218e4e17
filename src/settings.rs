//! Runtime settings that survive a restart.
//!
//! Only values that change while the beacon runs are stored here: the
//! crystal correction saved from calibration, a GPS-derived locator, and
//! the station identity edited from the control surface. They overlay the
//! static configuration at boot; a factory reset empties the store.

use crate::encoder::Identity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("settings store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    pub correction_ppb: Option<i32>,
    pub callsign: Option<String>,
    pub locator: Option<String>,
    pub power_mw: Option<u32>,
}

pub trait SettingsStore {
    fn load(&self) -> Result<PersistedSettings, SettingsError>;

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError>;

    fn save_correction(&mut self, ppb: i32) -> Result<(), SettingsError> {
        let mut settings = self.load()?;
        settings.correction_ppb = Some(ppb);
        self.save(&settings)
    }

    fn save_locator(&mut self, locator: &str) -> Result<(), SettingsError> {
        let mut settings = self.load()?;
        settings.locator = Some(locator.to_string());
        self.save(&settings)
    }

    fn save_identity(&mut self, identity: &Identity) -> Result<(), SettingsError> {
        let mut settings = self.load()?;
        settings.callsign = Some(identity.callsign.clone());
        settings.locator = Some(identity.locator.clone());
        settings.power_mw = Some(identity.power_mw);
        self.save(&settings)
    }

    /// Forget everything, so the next boot runs on the configuration alone.
    fn clear(&mut self) -> Result<(), SettingsError> {
        self.save(&PersistedSettings::default())
    }
}

/// Settings kept as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsStore for JsonFileSettings {
    /// A missing file is an empty settings set.
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No settings file yet");
            return Ok(PersistedSettings::default());
        }
        let json = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        // Replaced by rename, never rewritten in place.
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))?;
        info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

/// In-process store. Clones share the same contents, so a test can keep a
/// handle and inspect what the controller saved.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    inner: Arc<Mutex<PersistedSettings>>,
}

impl MemorySettings {
    #[must_use]
    pub fn new(initial: PersistedSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PersistedSettings {
        self.inner.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        let inner = self.inner.lock().map_err(|_| SettingsError::Poisoned)?;
        Ok(inner.clone())
    }

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        let mut inner = self.inner.lock().map_err(|_| SettingsError::Poisoned)?;
        *inner = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("wspr-beacon-{}-{}", name, rand::random::<u32>()))
            .join("settings.json")
    }

    #[test]
    fn test_memory_store_shares_state() {
        let store = MemorySettings::default();
        let mut writer = store.clone();
        writer.save_correction(-1200).unwrap();
        writer.save_locator("JN58sc").unwrap();

        let saved = store.snapshot();
        assert_eq!(saved.correction_ppb, Some(-1200));
        assert_eq!(saved.locator.as_deref(), Some("JN58sc"));
    }

    #[test]
    fn test_memory_store_reports_poisoned_lock() {
        let mut store = MemorySettings::default();
        let holder = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.inner.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(matches!(store.save_correction(10), Err(SettingsError::Poisoned)));
        assert!(matches!(store.load(), Err(SettingsError::Poisoned)));
    }

    #[test]
    fn test_identity_saved_and_cleared() {
        let mut store = MemorySettings::default();
        store.save_correction(-40).unwrap();
        store
            .save_identity(&Identity {
                callsign: "W1XYZ".to_string(),
                locator: "FN42".to_string(),
                power_mw: 2_000,
            })
            .unwrap();

        let saved = store.snapshot();
        assert_eq!(saved.callsign.as_deref(), Some("W1XYZ"));
        assert_eq!(saved.locator.as_deref(), Some("FN42"));
        assert_eq!(saved.power_mw, Some(2_000));
        assert_eq!(saved.correction_ppb, Some(-40));

        store.clear().unwrap();
        assert_eq!(store.snapshot(), PersistedSettings::default());
    }

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let store = JsonFileSettings::new(scratch_path("missing"));
        assert_eq!(store.load().unwrap(), PersistedSettings::default());
    }

    #[test]
    fn test_json_store_round_trip() {
        let path = scratch_path("roundtrip");
        let mut store = JsonFileSettings::new(&path);
        store.save_correction(350).unwrap();
        store.save_locator("FN31pr").unwrap();

        let reopened = JsonFileSettings::new(&path).load().unwrap();
        assert_eq!(reopened.correction_ppb, Some(350));
        assert_eq!(reopened.locator.as_deref(), Some("FN31pr"));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let path = scratch_path("garbage");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let result = JsonFileSettings::new(&path).load();
        assert!(matches!(result, Err(SettingsError::Format(_))));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
