use std::collections::HashMap;

use crate::response::DecodedMbox;

/// Prefetched mbox content waiting to be retrieved.
///
/// Entries are keyed by mbox name only. A later retrieve with different parameters is still
/// served the prefetched entry.
#[derive(Debug, Default)]
pub(crate) struct PrefetchCache {
    entries: HashMap<String, DecodedMbox>,
}

impl PrefetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the entry for `name`. Each entry is served at most once.
    pub fn lookup(&mut self, name: &str) -> Option<DecodedMbox> {
        self.entries.remove(name)
    }

    /// Store `entry`, replacing any previous entry for `name`.
    pub fn store(&mut self, name: &str, entry: DecodedMbox) {
        self.entries.insert(name.to_owned(), entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
