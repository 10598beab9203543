// Gateway module for context - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod history;
mod parser;
mod path_key;
mod reader;
mod tree_parser;

// Public re-exports - the ONLY way to access context functionality
pub use history::{HistoryEntry, HistorySequence, HistoryTracker};
pub use parser::CstParser;
pub use path_key::{PathKey, Workspace};
pub use reader::{ContextFile, ContextReader};
pub use tree_parser::{LanguageKind, Symbol, SymbolKind, SyntaxTree, TreeSitterParser};
