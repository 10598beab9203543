use std::sync::Arc;

use super::path_key::PathKey;

/// One visited file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub key: PathKey,
    /// Logical timestamp of the latest visit
    pub last_visited_at: u64,
}

/// Bounded, deduplicated record of visited files
///
/// Entries are stored oldest first behind an `Arc`, so handing out an ordered
/// snapshot is a pointer copy and later mutations copy on write.
#[derive(Debug, Clone)]
pub struct HistoryTracker {
    entries: Arc<Vec<HistoryEntry>>,
    capacity: usize,
    clock: u64,
}

impl HistoryTracker {
    /// Create a tracker holding at most `capacity` files (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// Move `key` to the most recent position
    ///
    /// Returns the entry evicted to stay within capacity, if any. Eviction only
    /// affects the history; cached trees stay where they are.
    pub fn add_history(&mut self, key: PathKey) -> Option<PathKey> {
        self.clock += 1;
        let visited_at = self.clock;

        let entries = Arc::make_mut(&mut self.entries);
        entries.retain(|entry| entry.key != key);
        entries.push(HistoryEntry {
            key,
            last_visited_at: visited_at,
        });

        if entries.len() > self.capacity {
            Some(entries.remove(0).key)
        } else {
            None
        }
    }

    /// Remove `key` if present
    pub fn delete_history(&mut self, key: &PathKey) -> bool {
        if !self.contains(key) {
            return false;
        }
        Arc::make_mut(&mut self.entries).retain(|entry| &entry.key != key);
        true
    }

    /// Remove every key lexically under `prefix`
    pub fn delete_under(&mut self, prefix: &PathKey) -> Vec<PathKey> {
        let doomed: Vec<PathKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key.is_under(prefix))
            .map(|entry| entry.key.clone())
            .collect();

        if !doomed.is_empty() {
            Arc::make_mut(&mut self.entries).retain(|entry| !entry.key.is_under(prefix));
        }
        doomed
    }

    /// Change the bound, evicting the oldest entries if needed
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<PathKey> {
        self.capacity = capacity.max(1);
        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return Vec::new();
        }
        Arc::make_mut(&mut self.entries)
            .drain(..excess)
            .map(|entry| entry.key)
            .collect()
    }

    /// Most-recent-first snapshot of the history
    pub fn as_ordered_sequence(&self) -> HistorySequence {
        HistorySequence {
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn contains(&self, key: &PathKey) -> bool {
        self.entries.iter().any(|entry| &entry.key == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Frozen view of the history at the time it was taken
///
/// Iteration is lazy and can be restarted any number of times.
#[derive(Debug, Clone)]
pub struct HistorySequence {
    entries: Arc<Vec<HistoryEntry>>,
}

impl HistorySequence {
    /// Keys, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &PathKey> + '_ {
        self.entries.iter().rev().map(|entry| &entry.key)
    }

    /// Entries with their visit timestamps, most recent first
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        self.entries.iter().rev()
    }

    pub fn to_vec(&self) -> Vec<PathKey> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a HistorySequence {
    type Item = &'a PathKey;
    type IntoIter = std::iter::Map<
        std::iter::Rev<std::slice::Iter<'a, HistoryEntry>>,
        fn(&'a HistoryEntry) -> &'a PathKey,
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn key_of(entry: &HistoryEntry) -> &PathKey {
            &entry.key
        }
        self.entries.iter().rev().map(key_of as fn(&'a HistoryEntry) -> &'a PathKey)
    }
}
