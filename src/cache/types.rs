use std::sync::Arc;

use crate::context::PathKey;

/// Ordering stamp for cache mutations
///
/// Revisions are handed out by the cache when an editor event is observed,
/// before any parse work starts. A mutation carrying a revision at or below the
/// key's applied revision is stale and gets dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub(crate) u64);

impl Revision {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Cache entry for one file
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub key: PathKey,
    /// `None` means the file is known to be deleted
    pub tree: Option<Arc<T>>,
    /// Bumped on every applied replace or invalidate
    pub version: u64,
    /// Revision of the last applied mutation
    pub revision: Revision,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            tree: self.tree.clone(),
            version: self.version,
            revision: self.revision,
        }
    }
}

/// What the cache knows about a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Never parsed, never deleted
    Unknown,
    /// A tree is cached at this version
    Present { version: u64 },
    /// Known deleted; the tree was dropped at this version
    Deleted { version: u64 },
}

/// Outcome of a revision-guarded mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mutation was installed; carries the new entry version
    Applied { version: u64 },
    /// A newer mutation was already applied; nothing changed
    Stale { applied: Revision },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub live_entries: usize,
    pub deleted_entries: usize,
    pub hits: usize,
    pub misses: usize,
    pub applied: usize,
    pub dropped_stale: usize,
}

impl CacheStats {
    /// Format cache stats for display
    pub fn format(&self) -> String {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            (self.hits as f32 / total as f32) * 100.0
        } else {
            0.0
        };
        format!(
            "Cache Statistics:\n\
            Trees: {} live, {} known deleted\n\
            Mutations: {} applied, {} dropped as stale\n\
            Hit Rate: {:.1}% ({} hits, {} misses)",
            self.live_entries,
            self.deleted_entries,
            self.applied,
            self.dropped_stale,
            hit_rate,
            self.hits,
            self.misses
        )
    }
}
