//! # Durable Preferences: Alerts and Favorites
//!
//! Both persisted collections live in one key-value preferences blob, each under
//! its own key with a JSON payload:
//!
//! | key                | payload                                   |
//! |--------------------|-------------------------------------------|
//! | `wait_time_alerts` | `[{"attractionCode": .., ...}, ...]`      |
//! | `favorite_codes`   | `["silverstar", "blue-fire", ...]`        |
//!
//! [`FilePreferences`] keeps the blob in a JSON file and rewrites it atomically
//! (temp file + rename) on every change, so an interrupted write never leaves a
//! half-written file behind. [`MemoryPreferences`] is the non-durable twin used by
//! tests and dry runs.
//!
//! Each repository operation is one [`KeyValueStore::update`], so a
//! read-modify-write never loses a change made in between, whether by another
//! thread or another process sharing the file.

use crate::Alert;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::{fs, io};
use thiserror::Error;
use tracing::debug;

/// Preference key holding the alert list
pub const KEY_WAIT_TIME_ALERTS: &str = "wait_time_alerts";
/// Preference key holding the favorite attraction codes
pub const KEY_FAVORITE_CODES: &str = "favorite_codes";

/// Errors from durable storage.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the preferences file failed
    #[error("store IO: {0}")]
    Io(#[from] io::Error),

    /// A stored payload is not valid JSON of the expected shape
    #[error("corrupt payload under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Generic durable string-keyed blob store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Read-modify-write of one key as a single atomic step.
    ///
    /// `f` sees the current payload and returns the replacement, or `None` to
    /// leave the key untouched.
    fn update(&self, key: &str, f: &mut Edit<'_>) -> Result<(), StoreError>;
}

/// Closure passed to [`KeyValueStore::update`].
pub type Edit<'a> = dyn FnMut(Option<&str>) -> Result<Option<String>, StoreError> + 'a;

/// Durable collection of active alerts, keyed by attraction code.
pub trait AlertStore: Send + Sync {
    /// Snapshot of every alert. Order carries no meaning.
    fn get_all(&self) -> Result<Vec<Alert>, StoreError>;

    fn get(&self, attraction_code: &str) -> Result<Option<Alert>, StoreError> {
        Ok(self
            .get_all()?
            .into_iter()
            .find(|alert| alert.attraction_code == attraction_code))
    }

    /// Insert, replacing any alert with the same attraction code.
    fn upsert(&self, alert: Alert) -> Result<(), StoreError>;

    /// Remove the alert for `attraction_code`. Absent codes are a no-op.
    fn remove(&self, attraction_code: &str) -> Result<(), StoreError>;
}

/// Durable set of favorite attraction codes.
pub trait FavoritesStore: Send + Sync {
    fn list(&self) -> Result<BTreeSet<String>, StoreError>;

    fn contains(&self, attraction_code: &str) -> Result<bool, StoreError> {
        Ok(self.list()?.contains(attraction_code))
    }

    fn add(&self, attraction_code: &str) -> Result<(), StoreError>;

    /// Absent codes are a no-op.
    fn remove(&self, attraction_code: &str) -> Result<(), StoreError>;

    /// Flip membership and return whether the code is a favorite afterwards.
    fn toggle(&self, attraction_code: &str) -> Result<bool, StoreError>;
}

// -- Key-value backends --

/// JSON-file preferences, re-read from disk on every operation.
///
/// Several processes may share one file (a long-running `watch` next to CLI
/// edits). Every operation holds an advisory lock on a `.lock` sibling while it
/// reads, modifies and rewrites the file, so no writer ever clobbers a change it
/// has not seen.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    lock_path: PathBuf,
    local: Mutex<()>,
}

impl FilePreferences {
    /// Open the preferences file at `path`. A missing file starts empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let prefs = FilePreferences {
            lock_path: sibling(&path, ".lock"),
            path,
            local: Mutex::new(()),
        };
        prefs.locked(|_| Ok(((), false)))?;
        debug!(path = %prefs.path.display(), "preferences_opened");
        Ok(prefs)
    }

    /// Run `f` over the current file contents under the file lock, persisting
    /// the map afterwards when `f` reports a change.
    fn locked<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> Result<(R, bool), StoreError>,
    ) -> Result<R, StoreError> {
        let _local = self.local.lock();
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        // Released when `lock` is closed
        lock.lock_exclusive()?;

        let mut entries = self.read()?;
        let (result, changed) = f(&mut entries)?;
        if changed {
            self.persist(&entries)?;
        }
        Ok(result)
    }

    fn read(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
                key: self.path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entries).map_err(io::Error::from)?;
        let tmp = sibling(&self.path, ".tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl KeyValueStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.locked(|entries| Ok((entries.get(key).cloned(), false)))
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.locked(|entries| {
            entries.insert(key.to_string(), value);
            Ok(((), true))
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.locked(|entries| Ok(((), entries.remove(key).is_some())))
    }

    fn update(&self, key: &str, f: &mut Edit<'_>) -> Result<(), StoreError> {
        self.locked(|entries| {
            let next = f(entries.get(key).map(String::as_str))?;
            match next {
                Some(value) => {
                    entries.insert(key.to_string(), value);
                    Ok(((), true))
                }
                None => Ok(((), false)),
            }
        })
    }
}

/// In-memory preferences; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn update(&self, key: &str, f: &mut Edit<'_>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let next = f(entries.get(key).map(String::as_str))?;
        if let Some(value) = next {
            entries.insert(key.to_string(), value);
        }
        Ok(())
    }
}

// -- Repositories --

fn decode<T: serde::de::DeserializeOwned + Default>(
    key: &str,
    raw: Option<&str>,
) -> Result<T, StoreError> {
    match raw {
        Some(raw) => serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        }),
        None => Ok(T::default()),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value).map_err(io::Error::from)?)
}

fn alert_map(raw: Option<&str>) -> Result<BTreeMap<String, Alert>, StoreError> {
    let alerts: Vec<Alert> = decode(KEY_WAIT_TIME_ALERTS, raw)?;
    Ok(alerts
        .into_iter()
        .map(|alert| (alert.attraction_code.clone(), alert))
        .collect())
}

/// [`AlertStore`] over a [`KeyValueStore`], payload is a JSON list sorted by code.
pub struct AlertRepository {
    kv: Arc<dyn KeyValueStore>,
}

impl AlertRepository {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        AlertRepository { kv }
    }

    /// Apply `f` to the stored alerts; it returns whether anything changed.
    fn modify(
        &self,
        mut f: impl FnMut(&mut BTreeMap<String, Alert>) -> bool,
    ) -> Result<(), StoreError> {
        self.kv.update(KEY_WAIT_TIME_ALERTS, &mut |raw: Option<&str>| {
            let mut alerts = alert_map(raw)?;
            if !f(&mut alerts) {
                return Ok(None);
            }
            let list: Vec<&Alert> = alerts.values().collect();
            encode(&list).map(Some)
        })
    }
}

impl AlertStore for AlertRepository {
    fn get_all(&self) -> Result<Vec<Alert>, StoreError> {
        let raw = self.kv.get(KEY_WAIT_TIME_ALERTS)?;
        Ok(alert_map(raw.as_deref())?.into_values().collect())
    }

    fn upsert(&self, alert: Alert) -> Result<(), StoreError> {
        self.modify(|alerts| {
            alerts.insert(alert.attraction_code.clone(), alert.clone());
            true
        })
    }

    fn remove(&self, attraction_code: &str) -> Result<(), StoreError> {
        self.modify(|alerts| alerts.remove(attraction_code).is_some())
    }
}

/// [`FavoritesStore`] over a [`KeyValueStore`].
pub struct FavoritesRepository {
    kv: Arc<dyn KeyValueStore>,
}

impl FavoritesRepository {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        FavoritesRepository { kv }
    }

    fn update<R: Default>(
        &self,
        mut f: impl FnMut(&mut BTreeSet<String>) -> R,
    ) -> Result<R, StoreError> {
        let mut result = None;
        self.kv.update(KEY_FAVORITE_CODES, &mut |raw: Option<&str>| {
            let mut codes: BTreeSet<String> = decode(KEY_FAVORITE_CODES, raw)?;
            result = Some(f(&mut codes));
            encode(&codes).map(Some)
        })?;
        Ok(result.unwrap_or_default())
    }
}

impl FavoritesStore for FavoritesRepository {
    fn list(&self) -> Result<BTreeSet<String>, StoreError> {
        let raw = self.kv.get(KEY_FAVORITE_CODES)?;
        decode(KEY_FAVORITE_CODES, raw.as_deref())
    }

    fn add(&self, attraction_code: &str) -> Result<(), StoreError> {
        self.update(|codes| {
            codes.insert(attraction_code.to_string());
        })
    }

    fn remove(&self, attraction_code: &str) -> Result<(), StoreError> {
        self.update(|codes| {
            codes.remove(attraction_code);
        })
    }

    fn toggle(&self, attraction_code: &str) -> Result<bool, StoreError> {
        self.update(|codes| {
            if codes.remove(attraction_code) {
                false
            } else {
                codes.insert(attraction_code.to_string());
                true
            }
        })
    }
}
