use serde::{Deserialize, Serialize};

use crate::trigger::SessionId;

/// Editor lifecycle notifications consumed by the orchestrator
///
/// `path` accepts whatever the editor uses to name a document: a `file://`
/// URI, an absolute path or a workspace-relative path. The serialized form is
/// one JSON object per line with an `event` tag, which is what `fimctx replay`
/// reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EditorEvent {
    /// A file became the active editor
    Opened {
        session: SessionId,
        path: String,
        content: String,
    },
    /// The active document's content changed
    Edited {
        session: SessionId,
        path: String,
        content: String,
    },
    /// No editor is active any more
    FocusLost { session: SessionId },
    /// Files or directories are about to be deleted
    WillDelete { paths: Vec<String> },
    /// Runtime reconfiguration of the debounce window
    SetDebounce { millis: u64 },
    /// Runtime reconfiguration of the history bound
    SetHistoryLimit { entries: usize },
    /// Stop the event loop
    Shutdown,
}

impl EditorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EditorEvent::Opened { .. } => "opened",
            EditorEvent::Edited { .. } => "edited",
            EditorEvent::FocusLost { .. } => "focus_lost",
            EditorEvent::WillDelete { .. } => "will_delete",
            EditorEvent::SetDebounce { .. } => "set_debounce",
            EditorEvent::SetHistoryLimit { .. } => "set_history_limit",
            EditorEvent::Shutdown => "shutdown",
        }
    }
}
