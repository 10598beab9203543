// Gateway module for cache - follows the Train Station Pattern
// All external access must go through this gateway

mod cst_cache;
mod types;

pub use cst_cache::CstCache;
pub use types::{ApplyOutcome, CacheEntry, CacheStats, EntryState, Revision};
