//! The deferred-write record store.
//!
//! A [`RecordStore`] runs like a dbm in fast mode: all writes are delayed
//! until an explicit [`sync`](RecordStore::sync). While open, the whole
//! mapping is resident in memory and is the sole source of truth; the
//! backing file reflects it only immediately after a successful sync.
//! Start-up and close are proportional to dataset size because the entire
//! file is read or written at once.
//!
//! The input format is discovered automatically by trial parsing; the
//! output format is configured per store (see [`Format`]).

pub mod format;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::error::StoreError;

pub use format::Format;

/// How a store treats its backing file at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Load the file; every mutation is rejected and `sync` is a no-op.
    ReadOnly,
    /// Load the file if present, otherwise start empty.
    #[default]
    CreateIfAbsent,
    /// Always start empty, ignoring any existing file.
    CreateNew,
}

/// Open-time configuration for a [`RecordStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Open mode; defaults to [`OpenMode::CreateIfAbsent`].
    pub mode: OpenMode,
    /// Output format used by `sync`; input is auto-detected regardless.
    pub format: Format,
    /// Unix permission bits applied after a successful sync, e.g. `0o644`.
    pub permissions: Option<u32>,
}

impl StoreOptions {
    /// Options writing the given output format, with default mode.
    #[must_use]
    pub fn with_format(format: Format) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Read-only options.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            ..Self::default()
        }
    }
}

/// A mapping from string keys to records, loaded whole at open time and
/// written back whole on [`sync`](Self::sync) via a temp-file-then-rename
/// commit.
#[derive(Debug)]
pub struct RecordStore<V> {
    path: PathBuf,
    mode: OpenMode,
    format: Format,
    permissions: Option<u32>,
    map: HashMap<String, V>,
}

impl<V> RecordStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Opens (or creates) a store backed by `path`.
    ///
    /// With [`OpenMode::CreateNew`] the store starts empty without reading
    /// the file. Otherwise a readable file is loaded with auto-detected
    /// format; a missing file is an error only under
    /// [`OpenMode::ReadOnly`].
    ///
    /// # Errors
    /// - [`StoreError::NotFound`] if the file is absent in read-only mode
    /// - [`StoreError::UnrecognizedFormat`] if no candidate format parses
    /// - [`StoreError::Io`] if the file exists but cannot be read
    pub fn open(path: impl Into<PathBuf>, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.into();
        let mut store = Self {
            path,
            mode: options.mode,
            format: options.format,
            permissions: options.permissions,
            map: HashMap::new(),
        };

        if store.mode == OpenMode::CreateNew {
            return Ok(store);
        }

        match fs::read(&store.path) {
            Ok(bytes) => {
                store.load(&bytes)?;
                info!(
                    path = %store.path.display(),
                    entries = store.map.len(),
                    "loaded store"
                );
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if store.mode == OpenMode::ReadOnly {
                    return Err(StoreError::NotFound { path: store.path });
                }
                debug!(path = %store.path.display(), "backing file absent, starting empty");
            }
            Err(err) => {
                return Err(StoreError::Io {
                    path: store.path,
                    source: err,
                })
            }
        }

        Ok(store)
    }

    /// Parses `bytes` with the fixed candidate order
    /// ([`Format::DETECTION_ORDER`]) and additively updates the mapping:
    /// the first format whose deserializer completes wins, and keys
    /// already in memory but absent from the parsed data are preserved.
    ///
    /// # Errors
    /// [`StoreError::UnrecognizedFormat`] if every candidate rejects the
    /// input.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        for candidate in Format::DETECTION_ORDER {
            match format::decode::<V>(candidate, bytes) {
                Ok(parsed) => {
                    debug!(
                        path = %self.path.display(),
                        format = %candidate,
                        entries = parsed.len(),
                        "detected input format"
                    );
                    self.map.extend(parsed);
                    return Ok(());
                }
                Err(err) => {
                    trace!(format = %candidate, error = %err, "candidate format rejected input");
                }
            }
        }
        Err(StoreError::UnrecognizedFormat {
            path: self.path.clone(),
        })
    }

    /// Returns the record under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.map.get(key)
    }

    /// Returns a mutable reference to the record under `key`, if any.
    ///
    /// # Errors
    /// [`StoreError::PermissionDenied`] on a read-only store.
    pub fn get_mut(&mut self, key: &str) -> Result<Option<&mut V>, StoreError> {
        self.check_writable()?;
        Ok(self.map.get_mut(key))
    }

    /// Inserts or replaces the record under `key`, returning the previous
    /// record if one existed.
    ///
    /// # Errors
    /// [`StoreError::PermissionDenied`] on a read-only store.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Result<Option<V>, StoreError> {
        self.check_writable()?;
        Ok(self.map.insert(key.into(), value))
    }

    /// Removes and returns the record under `key`.
    ///
    /// # Errors
    /// [`StoreError::PermissionDenied`] on a read-only store.
    pub fn remove(&mut self, key: &str) -> Result<Option<V>, StoreError> {
        self.check_writable()?;
        Ok(self.map.remove(key))
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Forward-only iterator over the keys, in the underlying mapping's
    /// iteration order (implementation-defined, not chronological).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Iterator over `(key, record)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of records currently in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured output format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// The mode the store was opened with.
    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Writes the entire mapping to disk, atomically.
    ///
    /// A no-op when the store is read-only. Otherwise the mapping is
    /// serialized in the configured output format, written to a sibling
    /// `.tmp` path, and renamed onto the target (the given `alt_path`, or
    /// the store's own path) only once the write fully succeeded. On any
    /// failure the temporary file is removed and the original file is
    /// left untouched, so a failed sync never corrupts existing data.
    ///
    /// # Errors
    /// [`StoreError::WriteFailure`] on any serialization or I/O error.
    pub fn sync(&self, alt_path: Option<&Path>) -> Result<(), StoreError> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let target = alt_path.unwrap_or(&self.path);

        let bytes = format::encode(self.format, &self.map).map_err(|err| {
            StoreError::WriteFailure {
                path: target.to_path_buf(),
                reason: err.to_string(),
            }
        })?;

        let mut tmp = target.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(err) = fs::write(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::WriteFailure {
                path: target.to_path_buf(),
                reason: err.to_string(),
            });
        }

        if let Err(err) = fs::rename(&tmp, target) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::WriteFailure {
                path: target.to_path_buf(),
                reason: err.to_string(),
            });
        }

        #[cfg(unix)]
        if let Some(bits) = self.permissions {
            use std::os::unix::fs::PermissionsExt;
            if let Err(err) = fs::set_permissions(target, fs::Permissions::from_mode(bits)) {
                return Err(StoreError::WriteFailure {
                    path: target.to_path_buf(),
                    reason: format!("failed to apply permissions: {err}"),
                });
            }
        }

        info!(
            path = %target.display(),
            format = %self.format,
            entries = self.map.len(),
            "synced store"
        );
        Ok(())
    }

    /// Equivalent to `sync(None)`.
    ///
    /// # Errors
    /// See [`sync`](Self::sync).
    pub fn close(&self) -> Result<(), StoreError> {
        self.sync(None)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(StoreError::PermissionDenied {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_empty(path: &Path, format: Format) -> RecordStore<String> {
        RecordStore::open(path, StoreOptions::with_format(format)).unwrap()
    }

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = open_empty(&dir.path().join("fresh.db"), Format::Json);
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_missing_file_read_only_fails() {
        let dir = tempdir().unwrap();
        let result: Result<RecordStore<String>, _> =
            RecordStore::open(dir.path().join("absent.db"), StoreOptions::read_only());
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_create_new_ignores_existing_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        fs::write(&path, b"k\t\"v\"\n").unwrap();

        let options = StoreOptions {
            mode: OpenMode::CreateNew,
            ..StoreOptions::default()
        };
        let store: RecordStore<String> = RecordStore::open(&path, options).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_is_additive() {
        let dir = tempdir().unwrap();
        let mut store = open_empty(&dir.path().join("a.db"), Format::Json);
        store.insert("kept", "in-memory".to_string()).unwrap();

        store.load(br#"{"loaded":"from-disk"}"#).unwrap();
        assert_eq!(store.get("kept").unwrap(), "in-memory");
        assert_eq!(store.get("loaded").unwrap(), "from-disk");
    }

    #[test]
    fn test_load_garbage_is_unrecognized() {
        let dir = tempdir().unwrap();
        let mut store = open_empty(&dir.path().join("a.db"), Format::Json);
        let result = store.load(&[0xC0, 0xFF, 0xEE]);
        assert!(matches!(result, Err(StoreError::UnrecognizedFormat { .. })));
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.db");
        let mut store = open_empty(&path, Format::Json);
        store.insert("k", "v".to_string()).unwrap();
        store.sync(None).unwrap();

        let mut store: RecordStore<String> =
            RecordStore::open(&path, StoreOptions::read_only()).unwrap();
        assert!(matches!(
            store.insert("k2", "v2".to_string()),
            Err(StoreError::PermissionDenied { .. })
        ));
        assert!(matches!(
            store.remove("k"),
            Err(StoreError::PermissionDenied { .. })
        ));
        assert!(matches!(
            store.get_mut("k"),
            Err(StoreError::PermissionDenied { .. })
        ));
        // Reads still work, and sync is a silent no-op.
        assert_eq!(store.get("k").unwrap(), "v");
        store.sync(None).unwrap();
    }

    #[test]
    fn test_sync_to_alternate_path() {
        let dir = tempdir().unwrap();
        let mut store = open_empty(&dir.path().join("main.db"), Format::Json);
        store.insert("k", "v".to_string()).unwrap();

        let alt = dir.path().join("alt.db");
        store.sync(Some(&alt)).unwrap();
        assert!(alt.exists());
        assert!(!dir.path().join("main.db").exists());

        let copy: RecordStore<String> =
            RecordStore::open(&alt, StoreOptions::default()).unwrap();
        assert_eq!(copy.get("k").unwrap(), "v");
    }

    #[test]
    fn test_sync_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clean.db");
        let mut store = open_empty(&path, Format::Binary);
        store.insert("k", "v".to_string()).unwrap();
        store.close().unwrap();

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["clean.db"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_applies_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("modes.db");
        let options = StoreOptions {
            permissions: Some(0o600),
            ..StoreOptions::default()
        };
        let mut store: RecordStore<String> = RecordStore::open(&path, options).unwrap();
        store.insert("k", "v".to_string()).unwrap();
        store.sync(None).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
