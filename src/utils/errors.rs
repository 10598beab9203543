use std::path::PathBuf;
use thiserror::Error;

/// Why a file could not be turned into a syntax tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unsupported file type: {0}")]
    UnsupportedLanguage(String),

    #[error("File too large to parse: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Language setup failed: {0}")]
    Language(String),

    #[error("Parse cancelled")]
    Cancelled,

    #[error("Parse failed: {0}")]
    Failed(String),
}

/// Main error type for the context subsystem
///
/// None of these are fatal. They are logged and handed to the observer as
/// warnings while the cache keeps serving the best data it has.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Parse error for {key}: {source}")]
    Parse {
        key: String,
        #[source]
        source: ParseError,
    },

    #[error("Failed to enumerate {}: {source}", path.display())]
    IoEnumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Event channel closed")]
    ChannelClosed,
}

impl ContextError {
    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ContextError::Parse { .. } => "parse",
            ContextError::IoEnumeration { .. } => "io-enumeration",
            ContextError::Configuration(_) => "configuration",
            ContextError::ChannelClosed => "channel-closed",
        }
    }
}
