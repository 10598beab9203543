use parking_lot::Mutex;

use crate::context::{HistorySequence, PathKey};
use crate::trigger::SessionId;
use crate::utils::{log_info, log_warn, ContextError};

/// Payload handed to the completion pipeline when a quiet period ends
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub session: SessionId,
    /// File touched by the last edit of the burst
    pub key: Option<PathKey>,
    /// Edits collapsed into this trigger
    pub coalesced: usize,
    /// History order at fire time
    pub history: HistorySequence,
}

/// Downstream collaborator of the orchestrator
#[cfg_attr(test, mockall::automock)]
pub trait ContextObserver: Send + Sync {
    /// A completion should be requested; called once per quiet period
    fn on_trigger(&self, request: TriggerRequest);

    /// Something degraded but processing continues
    fn on_warning(&self, _warning: &ContextError) {}
}

/// Observer that only writes log lines
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ContextObserver for LoggingObserver {
    fn on_trigger(&self, request: TriggerRequest) {
        let order: Vec<String> = request.history.iter().map(|key| key.to_string()).collect();
        log_info(
            "⚡",
            format!(
                "{} trigger for {} ({} edit(s)); context order: [{}]",
                request.session,
                request
                    .key
                    .as_ref()
                    .map(|key| key.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                request.coalesced,
                order.join(", ")
            ),
        );
    }

    fn on_warning(&self, warning: &ContextError) {
        log_warn("⚠️", warning);
    }
}

/// Observer that keeps everything it sees, for replays and tests
#[derive(Debug, Default)]
pub struct RecordingObserver {
    triggers: Mutex<Vec<TriggerRequest>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggers(&self) -> Vec<TriggerRequest> {
        self.triggers.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }
}

impl ContextObserver for RecordingObserver {
    fn on_trigger(&self, request: TriggerRequest) {
        self.triggers.lock().push(request);
    }

    fn on_warning(&self, warning: &ContextError) {
        self.warnings.lock().push(warning.to_string());
    }
}
