use parking_lot::RwLock;
use std::sync::Arc;

use super::history::{HistorySequence, HistoryTracker};
use super::path_key::PathKey;
use crate::cache::CstCache;

/// A cached file handed to the completion engine
#[derive(Debug)]
pub struct ContextFile<T> {
    pub key: PathKey,
    pub tree: Arc<T>,
}

impl<T> Clone for ContextFile<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            tree: Arc::clone(&self.tree),
        }
    }
}

/// Read-only view of the cache and history
///
/// Collaborators get one of these instead of the structures themselves; all
/// mutation stays with the orchestrator.
#[derive(Debug)]
pub struct ContextReader<T> {
    cache: Arc<CstCache<T>>,
    history: Arc<RwLock<HistoryTracker>>,
}

impl<T> Clone for ContextReader<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            history: Arc::clone(&self.history),
        }
    }
}

impl<T> ContextReader<T> {
    pub fn new(cache: Arc<CstCache<T>>, history: Arc<RwLock<HistoryTracker>>) -> Self {
        Self { cache, history }
    }

    pub fn get(&self, key: &PathKey) -> Option<Arc<T>> {
        self.cache.get(key)
    }

    /// Visited files, most recent first
    pub fn history(&self) -> HistorySequence {
        self.history.read().as_ordered_sequence()
    }

    /// Cached trees of recently visited files, most recent first
    ///
    /// The focus file is skipped (the engine already has its live buffer), as
    /// are visited files without a cached tree.
    pub fn assemble(&self, focus: Option<&PathKey>, limit: usize) -> Vec<ContextFile<T>> {
        let history = self.history();
        history
            .iter()
            .filter(|key| Some(*key) != focus)
            .filter_map(|key| {
                self.cache.get(key).map(|tree| ContextFile {
                    key: key.clone(),
                    tree,
                })
            })
            .take(limit)
            .collect()
    }
}
