use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::types::{ApplyOutcome, CacheEntry, CacheStats, EntryState, Revision};
use crate::context::PathKey;

/// In-memory cache of the latest syntax tree per file
///
/// Readers only ever see whole entries: every mutation swaps an entry under
/// the write lock, so `get` observes either the old or the new state of a key.
/// Writers for the same key are expected to be serialized by the caller; the
/// revision guard in [`CstCache::apply`] keeps late results from overwriting
/// newer state regardless.
#[derive(Debug)]
pub struct CstCache<T> {
    entries: RwLock<HashMap<PathKey, CacheEntry<T>>>,
    next_revision: AtomicU64,
    hits: AtomicUsize,
    misses: AtomicUsize,
    applied: AtomicUsize,
    dropped_stale: AtomicUsize,
}

impl<T> Default for CstCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CstCache<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_revision: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
            dropped_stale: AtomicUsize::new(0),
        }
    }

    /// Hand out a revision newer than every revision issued before
    pub fn reserve_revision(&self) -> Revision {
        Revision(self.next_revision.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Latest tree for `key`, or `None` if never parsed or known deleted
    pub fn get(&self, key: &PathKey) -> Option<Arc<T>> {
        let tree = self
            .entries
            .read()
            .get(key)
            .and_then(|entry| entry.tree.clone());

        if tree.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        tree
    }

    /// Snapshot of the full entry, tombstones included
    pub fn entry(&self, key: &PathKey) -> Option<CacheEntry<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Distinguish "never seen" from "known deleted"
    pub fn state(&self, key: &PathKey) -> EntryState {
        match self.entries.read().get(key) {
            None => EntryState::Unknown,
            Some(entry) if entry.tree.is_some() => EntryState::Present {
                version: entry.version,
            },
            Some(entry) => EntryState::Deleted {
                version: entry.version,
            },
        }
    }

    /// Install `tree` as the current value for `key`; returns the new version
    pub fn replace(&self, key: PathKey, tree: T) -> u64 {
        let revision = self.reserve_revision();
        let outcome = self.apply(key.clone(), Some(tree), revision);
        self.version_after(&key, outcome)
    }

    /// Editor-facing entry point: a new tree replaces, `None` marks deleted
    pub fn file_changed(&self, key: PathKey, tree: Option<T>) -> u64 {
        match tree {
            Some(tree) => self.replace(key, tree),
            None => self.invalidate(&key),
        }
    }

    /// Mark `key` as known deleted; returns the new version
    ///
    /// Invalidating an already absent key only bumps its version.
    pub fn invalidate(&self, key: &PathKey) -> u64 {
        let revision = self.reserve_revision();
        let outcome = self.apply(key.clone(), None, revision);
        self.version_after(key, outcome)
    }

    fn version_after(&self, key: &PathKey, outcome: ApplyOutcome) -> u64 {
        match outcome {
            ApplyOutcome::Applied { version } => version,
            // Another writer on this key got a newer revision in first
            ApplyOutcome::Stale { .. } => self
                .entries
                .read()
                .get(key)
                .map(|entry| entry.version)
                .unwrap_or_default(),
        }
    }

    /// Revision-guarded mutation used for results of asynchronous parses
    ///
    /// The mutation is dropped when `revision` is not newer than the revision
    /// already applied for `key`.
    pub fn apply(&self, key: PathKey, tree: Option<T>, revision: Revision) -> ApplyOutcome {
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get_mut(&key) {
            if revision <= entry.revision {
                self.dropped_stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Dropping stale mutation for {} (revision {} <= applied {})",
                    key,
                    revision.get(),
                    entry.revision.get()
                );
                return ApplyOutcome::Stale {
                    applied: entry.revision,
                };
            }
            entry.tree = tree.map(Arc::new);
            entry.version += 1;
            entry.revision = revision;
            self.applied.fetch_add(1, Ordering::Relaxed);
            return ApplyOutcome::Applied {
                version: entry.version,
            };
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                tree: tree.map(Arc::new),
                version: 1,
                revision,
            },
        );
        self.applied.fetch_add(1, Ordering::Relaxed);
        ApplyOutcome::Applied { version: 1 }
    }

    /// Mark every key lexically under `prefix` as deleted
    ///
    /// Returns the keys that held a tree before the call, sorted.
    pub fn invalidate_subtree(&self, prefix: &PathKey) -> Vec<PathKey> {
        let revision = self.reserve_revision();
        let mut removed = Vec::new();

        let mut entries = self.entries.write();
        for entry in entries.values_mut().filter(|entry| entry.key.is_under(prefix)) {
            if entry.tree.take().is_some() {
                removed.push(entry.key.clone());
            }
            entry.version += 1;
            entry.revision = revision;
        }
        drop(entries);

        self.applied.fetch_add(removed.len(), Ordering::Relaxed);
        removed.sort();
        removed
    }

    /// Keys that currently hold a tree, sorted
    pub fn keys(&self) -> Vec<PathKey> {
        let mut keys: Vec<PathKey> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.tree.is_some())
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of keys holding a tree
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.tree.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (live_entries, deleted_entries) = {
            let entries = self.entries.read();
            let live = entries.values().filter(|entry| entry.tree.is_some()).count();
            (live, entries.len() - live)
        };

        CacheStats {
            live_entries,
            deleted_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
        }
    }
}
