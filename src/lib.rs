pub mod app;
pub mod cache;
pub mod cli;
pub mod constants;
pub mod context;
pub mod runtime;
pub mod trigger;
pub mod utils;

pub use app::{load_config, Config};
pub use cache::CstCache;
pub use context::{ContextReader, CstParser, HistoryTracker, PathKey, TreeSitterParser, Workspace};
pub use runtime::{ContextObserver, ContextOrchestrator, ContextSettings, EditorEvent};
pub use trigger::{DebounceCoordinator, SessionId};
pub use utils::{ContextError, ParseError};
