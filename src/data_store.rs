use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::Result;

/// Persistent string-keyed storage for identifiers.
///
/// The store is owned by the worker thread and only touched from there.
pub trait DataStore {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;
    /// Store `value` under `key`.
    fn set(&mut self, key: &str, value: &str);
    /// Remove `key`.
    fn remove(&mut self, key: &str);
}

/// A [`DataStore`] that keeps values in memory only. Used when no persistent store is configured.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    values: HashMap<String, String>,
}

impl InMemoryDataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for InMemoryDataStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// A [`DataStore`] backed by a JSON object file.
///
/// The file is read once on open and rewritten on every mutation. Write failures are logged and
/// otherwise ignored.
#[derive(Debug)]
pub struct FileDataStore {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl FileDataStore {
    /// Open the store at `path`, loading existing values.
    ///
    /// A missing file yields an empty store. A corrupted file is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file exists but cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!(target: "target_delivery",
                           path:display = path.display();
                           "ignoring unreadable data store file: {:?}", err);
                HashMap::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(FileDataStore { path, values })
    }

    fn persist(&self) {
        if let Err(err) = self.write_file() {
            log::warn!(target: "target_delivery",
                       path:display = self.path.display();
                       "failed to persist data store: {:?}", err);
        }
    }

    fn write_file(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.values)?;
        // Replace atomically.
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl DataStore for FileDataStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
        self.persist();
    }

    fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.persist();
        }
    }
}
