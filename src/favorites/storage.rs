use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::Token;

pub const RECORD_VERSION: u32 = 1;

/// The single durable record holding the favorite set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritesRecord {
    pub version: u32,
    pub favorites: Vec<Token>,
}

impl FavoritesRecord {
    pub fn new(favorites: Vec<Token>) -> Self {
        Self { version: RECORD_VERSION, favorites }
    }
}

pub trait FavoritesStorage: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<FavoritesRecord>>;
    fn save(&self, record: &FavoritesRecord) -> Result<()>;
}

impl<S: FavoritesStorage + ?Sized> FavoritesStorage for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<FavoritesRecord>> {
        (**self).load()
    }

    fn save(&self, record: &FavoritesRecord) -> Result<()> {
        (**self).save(record)
    }
}

/// JSON file written through a temporary sibling and renamed into place, so a
/// crash mid-write leaves the previous record intact.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl FavoritesStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<FavoritesRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let record: FavoritesRecord = serde_json::from_str(&contents).map_err(|e| {
            Error::PersistenceFailure(format!("corrupt favorites at {}: {}", self.path.display(), e))
        })?;
        if record.version > RECORD_VERSION {
            return Err(Error::PersistenceFailure(format!(
                "favorites record version {} is newer than supported {}",
                record.version, RECORD_VERSION
            )));
        }
        debug!("Loaded {} favorites from {}", record.favorites.len(), self.path.display());
        Ok(Some(record))
    }

    fn save(&self, record: &FavoritesRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::PersistenceFailure(e.to_string()))?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Process-local storage. Saves can be made to fail to exercise recovery.
#[derive(Default)]
pub struct MemoryStorage {
    record: Mutex<Option<FavoritesRecord>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: FavoritesRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<FavoritesRecord> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

impl FavoritesStorage for MemoryStorage {
    fn load(&self) -> Result<Option<FavoritesRecord>> {
        self.record
            .lock()
            .map(|r| r.clone())
            .map_err(|_| Error::PersistenceFailure("memory storage poisoned".into()))
    }

    fn save(&self, record: &FavoritesRecord) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::PersistenceFailure("storage unavailable".into()));
        }
        let mut slot = self
            .record
            .lock()
            .map_err(|_| Error::PersistenceFailure("memory storage poisoned".into()))?;
        *slot = Some(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
