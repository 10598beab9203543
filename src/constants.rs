/// Constants module to avoid magic numbers in the codebase

// Debounce
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const MIN_DEBOUNCE_MS: u64 = 1;
pub const MAX_DEBOUNCE_MS: u64 = 10_000;

// History
pub const DEFAULT_HISTORY_ENTRIES: usize = 50;

// Parsing
pub const DEFAULT_MAX_PARSE_BYTES: usize = 1024 * 1024; // 1MB

// Deletion walk
pub const DEFAULT_ENUMERATION_RETRIES: usize = 2;

// Event loop
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const WATCHER_POLL_INTERVAL_MS: u64 = 50;

// Directories never worth watching
pub const IGNORED_DIRECTORIES: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    "dist",
    "build",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];
