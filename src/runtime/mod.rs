// Gateway module for runtime - follows the Train Station Pattern
// All external access must go through this gateway

mod deletion;
mod events;
mod observer;
mod orchestrator;

pub use deletion::{
    collect_deleted_files, DeletionReport, DirectoryEnumerator, EntryKind, FsEnumerator,
};
pub use events::EditorEvent;
pub use observer::{ContextObserver, LoggingObserver, RecordingObserver, TriggerRequest};
pub use orchestrator::{
    ContextOrchestrator, ContextSettings, OrchestratorHandle, ParseJob, ParseOutcome,
};
