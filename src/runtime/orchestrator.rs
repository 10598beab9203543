use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::deletion::{collect_deleted_files, DeletionReport, DirectoryEnumerator, FsEnumerator};
use super::events::EditorEvent;
use super::observer::{ContextObserver, TriggerRequest};
use crate::cache::{ApplyOutcome, CstCache, Revision};
use crate::constants::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_ENUMERATION_RETRIES, DEFAULT_HISTORY_ENTRIES,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::context::{ContextReader, CstParser, HistorySequence, HistoryTracker, PathKey, Workspace};
use crate::trigger::{Clock, DebounceCoordinator, DebounceState, SessionId, TokioClock};
use crate::utils::{ContextError, ParseError};

/// Validated runtime settings for one orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSettings {
    pub debounce: Duration,
    pub history_entries: usize,
    pub enumeration_retries: usize,
    pub queue_capacity: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            history_entries: DEFAULT_HISTORY_ENTRIES,
            enumeration_retries: DEFAULT_ENUMERATION_RETRIES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Parse work detached from the orchestrator so it can run on a worker thread
pub struct ParseJob<P: CstParser> {
    key: PathKey,
    revision: Revision,
    content: String,
    previous: Option<Arc<P::Tree>>,
    parser: Arc<P>,
}

impl<P: CstParser> ParseJob<P> {
    pub fn key(&self) -> &PathKey {
        &self.key
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Like [`ParseJob::run`], but a panicking parser yields a failed outcome
    pub fn run_catching(self) -> ParseOutcome<P::Tree> {
        let key = self.key.clone();
        let revision = self.revision;
        panic::catch_unwind(AssertUnwindSafe(|| self.run())).unwrap_or_else(|_| ParseOutcome {
            key,
            revision,
            result: Err(ParseError::Failed("parser panicked".to_string())),
        })
    }

    /// Run the parser; CPU bound, may block
    pub fn run(self) -> ParseOutcome<P::Tree> {
        let result = self
            .parser
            .parse(&self.key, &self.content, self.previous.as_deref());
        ParseOutcome {
            key: self.key,
            revision: self.revision,
            result,
        }
    }
}

/// Finished parse waiting to be applied
#[derive(Debug)]
pub struct ParseOutcome<T> {
    pub key: PathKey,
    pub revision: Revision,
    pub result: Result<T, ParseError>,
}

/// Sender side of the orchestrator's bounded event queue
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<EditorEvent>,
}

impl OrchestratorHandle {
    pub async fn send(&self, event: EditorEvent) -> Result<(), ContextError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ContextError::ChannelClosed)
    }

    /// For producers living on plain threads (e.g. filesystem watchers)
    pub fn blocking_send(&self, event: EditorEvent) -> Result<(), ContextError> {
        self.tx
            .blocking_send(event)
            .map_err(|_| ContextError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), ContextError> {
        self.send(EditorEvent::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single authority turning editor events into cache and history mutations
///
/// Every mutation goes through here. Parse requests are stamped with a cache
/// revision when their event is observed, so results that finish out of order
/// (or after the file was deleted) are rejected by the cache instead of
/// overwriting newer state.
pub struct ContextOrchestrator<P: CstParser> {
    workspace: Workspace,
    parser: Arc<P>,
    cache: Arc<CstCache<P::Tree>>,
    history: Arc<RwLock<HistoryTracker>>,
    debounce: DebounceCoordinator,
    enumerator: Arc<dyn DirectoryEnumerator>,
    observer: Arc<dyn ContextObserver>,
    settings: ContextSettings,
    /// Latest revision requested per key and not yet applied
    inflight: HashMap<PathKey, Revision>,
    /// Digest of the last content submitted for parsing per key
    digests: HashMap<PathKey, Vec<u8>>,
}

impl<P: CstParser> ContextOrchestrator<P> {
    /// Create an orchestrator on the real filesystem and tokio clock
    pub fn new(
        workspace: Workspace,
        parser: P,
        observer: Arc<dyn ContextObserver>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            workspace,
            parser: Arc::new(parser),
            cache: Arc::new(CstCache::new()),
            history: Arc::new(RwLock::new(HistoryTracker::new(settings.history_entries))),
            debounce: DebounceCoordinator::new(Arc::new(TokioClock), settings.debounce),
            enumerator: Arc::new(FsEnumerator),
            observer,
            settings,
            inflight: HashMap::new(),
            digests: HashMap::new(),
        }
    }

    /// Replace the time source used for debounce deadlines
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.debounce = DebounceCoordinator::new(clock, self.debounce.duration());
        self
    }

    /// Replace the directory enumeration used when files are deleted
    pub fn with_enumerator(mut self, enumerator: Arc<dyn DirectoryEnumerator>) -> Self {
        self.enumerator = enumerator;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn parser(&self) -> &Arc<P> {
        &self.parser
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Read-only handle for collaborators
    pub fn reader(&self) -> ContextReader<P::Tree> {
        ContextReader::new(Arc::clone(&self.cache), Arc::clone(&self.history))
    }

    pub fn cache(&self) -> &Arc<CstCache<P::Tree>> {
        &self.cache
    }

    pub fn history(&self) -> HistorySequence {
        self.history.read().as_ordered_sequence()
    }

    pub fn debounce_state(&self, session: SessionId) -> DebounceState {
        self.debounce.state(session)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.next_deadline()
    }

    /// Parses requested but not yet applied
    pub fn pending_parses(&self) -> usize {
        self.inflight.len()
    }

    /// Dispatch one editor event; returns parse work to run
    pub fn handle_event(&mut self, event: EditorEvent) -> Vec<ParseJob<P>> {
        debug!("Handling {} event", event.name());
        match event {
            EditorEvent::Opened {
                session,
                path,
                content,
            } => {
                let Some(key) = self.resolve(&path) else {
                    return Vec::new();
                };
                debug!("{} opened {}", session, key);
                self.on_file_opened(key, content).into_iter().collect()
            },
            EditorEvent::Edited {
                session,
                path,
                content,
            } => {
                let Some(key) = self.resolve(&path) else {
                    return Vec::new();
                };
                self.on_file_edited(session, key, content).into_iter().collect()
            },
            EditorEvent::FocusLost { session } => {
                self.on_focus_lost(session);
                Vec::new()
            },
            EditorEvent::WillDelete { paths } => {
                for path in paths {
                    if let Some(key) = self.resolve(&path) {
                        let root = self.workspace.path_for(&key);
                        self.on_file_deleted(&root);
                    }
                }
                Vec::new()
            },
            EditorEvent::SetDebounce { millis } => {
                if let Err(e) = self.debounce.set_duration_ms(millis) {
                    self.report(e);
                }
                self.settings.debounce = self.debounce.duration();
                Vec::new()
            },
            EditorEvent::SetHistoryLimit { entries } => {
                self.set_history_limit(entries);
                Vec::new()
            },
            EditorEvent::Shutdown => {
                self.debounce.cancel_all();
                Vec::new()
            },
        }
    }

    /// Handle an event and run its parse work on the calling thread
    pub fn process(&mut self, event: EditorEvent) {
        for job in self.handle_event(event) {
            let outcome = job.run();
            self.apply_parse(outcome);
        }
    }

    /// A file became active: record the visit and parse it
    pub fn on_file_opened(&mut self, key: PathKey, content: String) -> Option<ParseJob<P>> {
        if let Some(evicted) = self.history.write().add_history(key.clone()) {
            debug!("History full, dropped {}", evicted);
        }
        self.request_parse(key, content)
    }

    /// The active file changed: reparse it and (re)arm the session's trigger
    pub fn on_file_edited(
        &mut self,
        session: SessionId,
        key: PathKey,
        content: String,
    ) -> Option<ParseJob<P>> {
        let job = self.request_parse(key.clone(), content);
        self.debounce.on_edit(session, Some(key));
        job
    }

    /// The user left every editor: drop the pending trigger without firing
    pub fn on_focus_lost(&mut self, session: SessionId) -> bool {
        self.debounce.cancel(session)
    }

    /// Forget everything at or below `root`, which is about to be deleted
    pub fn on_file_deleted(&mut self, root: &Path) -> DeletionReport {
        let report = collect_deleted_files(
            &self.workspace,
            self.enumerator.as_ref(),
            root,
            self.settings.enumeration_retries,
        );

        {
            let mut history = self.history.write();
            for key in &report.files {
                // Files never parsed need no tombstone
                if self.cache.entry(key).is_some() || self.inflight.contains_key(key) {
                    self.cache.invalidate(key);
                }
                history.delete_history(key);
                self.inflight.remove(key);
                self.digests.remove(key);
            }
        }

        if let Some(root_key) = &report.root {
            // Lexical sweep for keys the walk could not reach
            let swept = self.cache.invalidate_subtree(root_key);
            let unlisted = self.history.write().delete_under(root_key);

            // Parses still in flight for never-cached files need a tombstone
            // so their results are rejected when they land
            let orphaned: Vec<PathKey> = self
                .inflight
                .keys()
                .filter(|key| key.is_under(root_key))
                .cloned()
                .collect();
            for key in orphaned {
                self.cache.invalidate(&key);
                self.inflight.remove(&key);
            }
            self.digests.retain(|key, _| !key.is_under(root_key));

            debug!(
                "Deleted {}: {} walked, {} swept, {} unlisted",
                root_key,
                report.files.len(),
                swept.len(),
                unlisted.len()
            );
        }

        for failure in &report.failures {
            warn!("Deletion walk incomplete: {}", failure);
            self.observer.on_warning(failure);
        }
        report
    }

    /// Install a finished parse, unless something newer already landed
    pub fn apply_parse(&mut self, outcome: ParseOutcome<P::Tree>) -> bool {
        let ParseOutcome {
            key,
            revision,
            result,
        } = outcome;

        let current = self.inflight.get(&key) == Some(&revision);
        if current {
            self.inflight.remove(&key);
        }

        match result {
            Ok(tree) => match self.cache.apply(key.clone(), Some(tree), revision) {
                ApplyOutcome::Applied { version } => {
                    debug!("Cached {} at version {}", key, version);
                    true
                },
                ApplyOutcome::Stale { applied } => {
                    debug!(
                        "Discarded superseded parse of {} (revision {} < {})",
                        key,
                        revision.get(),
                        applied.get()
                    );
                    false
                },
            },
            Err(source) if current => {
                // Allow identical content to be retried on the next event
                self.digests.remove(&key);
                self.report(ContextError::Parse {
                    key: key.to_string(),
                    source,
                });
                false
            },
            Err(source) => {
                debug!("Ignoring failure of superseded parse of {}: {}", key, source);
                false
            },
        }
    }

    /// Fire every elapsed quiet period
    pub fn fire_expired(&mut self) -> Vec<TriggerRequest> {
        let fired = self.debounce.poll_expired();
        if fired.is_empty() {
            return Vec::new();
        }

        let history = self.history();
        fired
            .into_iter()
            .map(|fired| {
                let request = TriggerRequest {
                    session: fired.session,
                    key: fired.key,
                    coalesced: fired.coalesced,
                    history: history.clone(),
                };
                info!(
                    "Completion trigger for {} after {} edit(s)",
                    request.session, request.coalesced
                );
                self.observer.on_trigger(request.clone());
                request
            })
            .collect()
    }

    /// Drive the orchestrator from a queue until it closes or shuts down
    pub async fn run(mut self, mut events: mpsc::Receiver<EditorEvent>) {
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<ParseOutcome<P::Tree>>();

        loop {
            let deadline = self.debounce.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    None | Some(EditorEvent::Shutdown) => {
                        self.debounce.cancel_all();
                        break;
                    },
                    Some(event) => {
                        for job in self.handle_event(event) {
                            let tx = results_tx.clone();
                            tokio::task::spawn_blocking(move || {
                                let _ = tx.send(job.run_catching());
                            });
                        }
                    },
                },
                Some(outcome) = results_rx.recv() => {
                    self.apply_parse(outcome);
                },
                _ = sleep_until(deadline) => {
                    self.fire_expired();
                },
            }
        }

        info!("Context orchestrator stopped");
    }

    /// Start the event loop on the current tokio runtime
    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (OrchestratorHandle { tx }, task)
    }

    fn request_parse(&mut self, key: PathKey, content: String) -> Option<ParseJob<P>> {
        let digest = Sha256::digest(content.as_bytes()).to_vec();
        if self.digests.get(&key) == Some(&digest)
            && (self.inflight.contains_key(&key) || self.cache.entry(&key).is_some_and(|e| e.tree.is_some()))
        {
            debug!("Content of {} unchanged, skipping parse", key);
            return None;
        }
        self.digests.insert(key.clone(), digest);

        let revision = self.cache.reserve_revision();
        self.inflight.insert(key.clone(), revision);
        let previous = self.cache.entry(&key).and_then(|entry| entry.tree);

        Some(ParseJob {
            key,
            revision,
            content,
            previous,
            parser: Arc::clone(&self.parser),
        })
    }

    fn set_history_limit(&mut self, entries: usize) {
        if entries == 0 {
            self.report(ContextError::Configuration(
                "history limit must be at least 1; keeping current limit".to_string(),
            ));
            return;
        }
        let evicted = self.history.write().set_capacity(entries);
        self.settings.history_entries = entries;
        debug!("History limit now {}, evicted {}", entries, evicted.len());
    }

    fn resolve(&self, path: &str) -> Option<PathKey> {
        match self.workspace.key_for_uri(path) {
            Ok(key) => Some(key),
            Err(e) => {
                self.report(e);
                None
            },
        }
    }

    fn report(&self, warning: ContextError) {
        warn!("{} warning: {}", warning.kind(), warning);
        self.observer.on_warning(&warning);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TreeSitterParser;
    use crate::runtime::deletion::{EntryKind, MockDirectoryEnumerator};
    use crate::runtime::observer::{MockContextObserver, RecordingObserver};
    use crate::trigger::ManualClock;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    const SESSION: SessionId = SessionId(7);

    /// Uppercases content; "!!" fails to parse and "boom" panics
    struct StubParser;

    impl CstParser for StubParser {
        type Tree = String;

        fn parse(
            &self,
            _key: &PathKey,
            content: &str,
            _previous: Option<&String>,
        ) -> Result<String, ParseError> {
            if content.contains("boom") {
                panic!("stub parser exploded");
            }
            if content.contains("!!") {
                Err(ParseError::Failed("stub rejects '!!'".to_string()))
            } else {
                Ok(content.to_uppercase())
            }
        }
    }

    fn key(s: &str) -> PathKey {
        PathKey::new(s)
    }

    fn stub_orchestrator(
        root: &Path,
        observer: Arc<dyn ContextObserver>,
    ) -> (ManualClock, ContextOrchestrator<StubParser>) {
        let clock = ManualClock::new();
        let orchestrator = ContextOrchestrator::new(
            Workspace::new(root),
            StubParser,
            observer,
            ContextSettings::default(),
        )
        .with_clock(Arc::new(clock.clone()));
        (clock, orchestrator)
    }

    fn opened(path: &str, content: &str) -> EditorEvent {
        EditorEvent::Opened {
            session: SESSION,
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn edited(path: &str, content: &str) -> EditorEvent {
        EditorEvent::Edited {
            session: SESSION,
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_open_records_history_and_tree() {
        let observer = Arc::new(RecordingObserver::new());
        let (_clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer);

        orch.process(opened("a.ts", "let a"));
        orch.process(opened("/ws/b.ts", "let b"));
        orch.process(opened("file:///ws/a.ts", "let a"));

        assert_eq!(orch.history().to_vec(), vec![key("a.ts"), key("b.ts")]);
        assert_eq!(orch.cache().get(&key("a.ts")).as_deref(), Some(&"LET A".to_string()));
        assert_eq!(orch.debounce_state(SESSION), DebounceState::Idle);
    }

    #[test]
    fn test_stale_parse_result_is_dropped() {
        let observer = Arc::new(RecordingObserver::new());
        let (_clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer);

        let older = orch.handle_event(edited("k.rs", "version n")).pop().unwrap();
        let newer = orch.handle_event(edited("k.rs", "version n+1")).pop().unwrap();
        assert!(older.revision() < newer.revision());

        // Newer work finishes first
        assert!(orch.apply_parse(newer.run()));
        assert!(!orch.apply_parse(older.run()));

        assert_eq!(orch.cache().get(&key("k.rs")).as_deref(), Some(&"VERSION N+1".to_string()));
        assert_eq!(orch.pending_parses(), 0);
    }

    #[test]
    fn test_parse_failure_keeps_previous_tree_and_warns() {
        let observer = Arc::new(RecordingObserver::new());
        let (_clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer.clone());

        orch.process(opened("a.rs", "good"));
        orch.process(edited("a.rs", "bad !!"));
        orch.process(edited("b.rs", "independent"));

        assert_eq!(orch.cache().get(&key("a.rs")).as_deref(), Some(&"GOOD".to_string()));
        assert_eq!(orch.cache().get(&key("b.rs")).as_deref(), Some(&"INDEPENDENT".to_string()));
        let warnings = observer.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("a.rs"));

        // Same failing content is retried rather than suppressed
        assert_eq!(orch.handle_event(edited("a.rs", "bad !!")).len(), 1);
    }

    #[test]
    fn test_identical_content_is_not_reparsed() {
        let observer = Arc::new(RecordingObserver::new());
        let (clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer.clone());

        orch.process(opened("a.rs", "same"));
        assert!(orch.handle_event(edited("a.rs", "same")).is_empty());
        assert!(matches!(orch.debounce_state(SESSION), DebounceState::Pending { .. }));

        clock.advance(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(orch.fire_expired().len(), 1);
        assert_eq!(orch.cache().entry(&key("a.rs")).unwrap().version, 1);
    }

    #[test]
    fn test_burst_of_edits_fires_single_trigger() {
        let observer = Arc::new(RecordingObserver::new());
        let (clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer.clone());

        orch.process(opened("a.ts", "v0"));
        for content in ["v1", "v2", "v3"] {
            orch.process(edited("a.ts", content));
            clock.advance(Duration::from_millis(15));
        }
        // 15ms of the window passed since the third edit
        clock.advance(Duration::from_millis(DEFAULT_DEBOUNCE_MS - 16));
        assert!(orch.fire_expired().is_empty());

        clock.advance(Duration::from_millis(1));
        let fired = orch.fire_expired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].coalesced, 3);
        assert_eq!(fired[0].key, Some(key("a.ts")));
        assert_eq!(fired[0].history.to_vec(), vec![key("a.ts")]);
        assert_eq!(observer.triggers().len(), 1);

        clock.advance(Duration::from_secs(2));
        assert!(orch.fire_expired().is_empty());
    }

    #[test]
    fn test_focus_lost_cancels_trigger() {
        let mut observer = MockContextObserver::new();
        observer.expect_on_trigger().times(0);
        let (clock, mut orch) = stub_orchestrator(Path::new("/ws"), Arc::new(observer));

        orch.process(edited("a.rs", "x"));
        orch.process(EditorEvent::FocusLost { session: SESSION });

        clock.advance(Duration::from_secs(1));
        assert!(orch.fire_expired().is_empty());
    }

    #[test]
    fn test_trigger_reaches_observer_once() {
        let mut observer = MockContextObserver::new();
        observer
            .expect_on_trigger()
            .times(1)
            .returning(|request| assert_eq!(request.session, SESSION));
        let (clock, mut orch) = stub_orchestrator(Path::new("/ws"), Arc::new(observer));

        orch.process(edited("a.rs", "x"));
        orch.process(edited("a.rs", "xy"));
        clock.advance(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        orch.fire_expired();
        orch.fire_expired();
    }

    #[test]
    fn test_history_eviction_keeps_cached_tree() {
        let observer = Arc::new(RecordingObserver::new());
        let clock = ManualClock::new();
        let mut orch = ContextOrchestrator::new(
            Workspace::new("/ws"),
            StubParser,
            observer,
            ContextSettings {
                history_entries: 2,
                ..Default::default()
            },
        )
        .with_clock(Arc::new(clock));

        orch.process(opened("a.rs", "a"));
        orch.process(opened("b.rs", "b"));
        orch.process(opened("c.rs", "c"));

        assert_eq!(orch.history().to_vec(), vec![key("c.rs"), key("b.rs")]);
        assert_eq!(orch.cache().get(&key("a.rs")).as_deref(), Some(&"A".to_string()));
        assert_eq!(orch.cache().stats().deleted_entries, 0);
    }

    #[test]
    fn test_pending_trigger_survives_deletion() {
        let observer = Arc::new(RecordingObserver::new());
        let temp_dir = TempDir::new().unwrap();
        let (clock, mut orch) = stub_orchestrator(temp_dir.path(), observer.clone());

        orch.process(edited("web/a.ts", "let a"));
        orch.process(EditorEvent::WillDelete {
            paths: vec!["web".to_string()],
        });
        assert!(orch.cache().get(&key("web/a.ts")).is_none());

        clock.advance(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let fired = orch.fire_expired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].key, Some(key("web/a.ts")));
        assert_eq!(observer.triggers().len(), 1);
    }

    #[test]
    fn test_deleting_unseen_files_leaves_no_tombstones() {
        let observer = Arc::new(RecordingObserver::new());
        let temp_dir = TempDir::new().unwrap();
        let modules = temp_dir.path().join("node_modules");
        fs::create_dir_all(modules.join("pkg")).unwrap();
        for name in ["a.js", "b.js", "pkg/c.js", "pkg/d.js"] {
            fs::write(modules.join(name), "module.exports = {};").unwrap();
        }
        let (_clock, mut orch) = stub_orchestrator(temp_dir.path(), observer.clone());

        orch.process(opened("node_modules/a.js", "module.exports = {};"));
        let report = orch.on_file_deleted(&modules);

        assert_eq!(report.files.len(), 4);
        let stats = orch.cache().stats();
        assert_eq!(stats.live_entries, 0);
        assert_eq!(stats.deleted_entries, 1);
        assert!(orch.cache().get(&key("node_modules/a.js")).is_none());
        assert!(observer.warnings().is_empty());
    }

    #[test]
    fn test_panicking_parser_releases_key() {
        let observer = Arc::new(RecordingObserver::new());
        let (_clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer.clone());

        orch.process(opened("a.rs", "fine"));
        let job = orch.handle_event(edited("a.rs", "boom")).pop().unwrap();
        let outcome = job.run_catching();
        assert!(matches!(outcome.result, Err(ParseError::Failed(_))));

        assert!(!orch.apply_parse(outcome));
        assert_eq!(orch.pending_parses(), 0);
        assert_eq!(observer.warnings().len(), 1);
        assert_eq!(orch.cache().get(&key("a.rs")).as_deref(), Some(&"FINE".to_string()));

        // Identical content is parsed again rather than skipped
        assert_eq!(orch.handle_event(edited("a.rs", "boom")).len(), 1);
    }

    #[test]
    fn test_parse_landing_after_delete_is_discarded() {
        let observer = Arc::new(RecordingObserver::new());
        let temp_dir = TempDir::new().unwrap();
        let (_clock, mut orch) = stub_orchestrator(temp_dir.path(), observer);

        let job = orch.handle_event(opened("new/file.rs", "fresh")).pop().unwrap();
        orch.process(EditorEvent::WillDelete {
            paths: vec!["new".to_string()],
        });

        assert!(!orch.apply_parse(job.run()));
        assert!(orch.cache().get(&key("new/file.rs")).is_none());
        assert!(orch.history().is_empty());
    }

    #[test]
    fn test_delete_survives_failing_intermediate_directory() {
        let observer = Arc::new(RecordingObserver::new());
        let mut enumerator = MockDirectoryEnumerator::new();
        enumerator
            .expect_kind()
            .returning(|_| Ok(EntryKind::Directory));
        enumerator.expect_read_dir().returning(|path| {
            if path == Path::new("/ws/d") {
                Ok(vec![
                    ("a.ts".to_string(), EntryKind::File),
                    ("b.ts".to_string(), EntryKind::File),
                    ("sub".to_string(), EntryKind::Directory),
                ])
            } else {
                Err(io::Error::new(io::ErrorKind::TimedOut, "transient"))
            }
        });

        let (_clock, orch) = stub_orchestrator(Path::new("/ws"), observer.clone());
        let mut orch = orch.with_enumerator(Arc::new(enumerator));

        for path in ["d/a.ts", "d/b.ts", "d/sub/inner/c.ts", "keep.ts"] {
            orch.process(opened(path, path));
        }

        let report = orch.on_file_deleted(Path::new("/ws/d"));

        let mut walked: Vec<String> = report.files.iter().map(|k| k.to_string()).collect();
        walked.sort();
        assert_eq!(walked, vec!["d/a.ts", "d/b.ts"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(observer.warnings().len(), 1);

        for path in ["d/a.ts", "d/b.ts", "d/sub/inner/c.ts"] {
            assert!(orch.cache().get(&key(path)).is_none(), "{} still cached", path);
        }
        assert_eq!(orch.history().to_vec(), vec![key("keep.ts")]);
        assert!(orch.cache().get(&key("keep.ts")).is_some());
    }

    #[test]
    fn test_invalid_reconfiguration_falls_back() {
        let observer = Arc::new(RecordingObserver::new());
        let (_clock, mut orch) = stub_orchestrator(Path::new("/ws"), observer.clone());

        orch.process(EditorEvent::SetDebounce { millis: 0 });
        orch.process(EditorEvent::SetHistoryLimit { entries: 0 });
        orch.process(EditorEvent::Opened {
            session: SESSION,
            path: "untitled:Untitled-1".to_string(),
            content: String::new(),
        });

        assert_eq!(orch.settings().debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(orch.settings().history_entries, DEFAULT_HISTORY_ENTRIES);
        assert_eq!(observer.warnings().len(), 3);
        assert!(orch.history().is_empty());
    }

    #[test]
    fn test_end_to_end_with_tree_sitter() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("web");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("a.ts"), "let a = 0;").unwrap();

        let observer = Arc::new(RecordingObserver::new());
        let clock = ManualClock::new();
        let mut orch = ContextOrchestrator::new(
            Workspace::new(temp_dir.path()),
            TreeSitterParser::default(),
            observer.clone(),
            ContextSettings::default(),
        )
        .with_clock(Arc::new(clock.clone()));
        let a = key("web/a.ts");

        orch.process(opened("web/a.ts", "let a = 0;"));
        assert_eq!(orch.history().to_vec(), vec![a.clone()]);
        assert_eq!(orch.cache().get(&a).unwrap().source(), "let a = 0;");

        for content in ["let a = 1;", "let a = 12;", "let a = 123;"] {
            orch.process(edited("web/a.ts", content));
            clock.advance(Duration::from_millis(20));
        }
        clock.advance(Duration::from_millis(DEFAULT_DEBOUNCE_MS - 21));
        assert!(orch.fire_expired().is_empty());
        clock.advance(Duration::from_millis(1));
        assert_eq!(orch.fire_expired().len(), 1);

        let tree = orch.cache().get(&a).unwrap();
        assert_eq!(tree.source(), "let a = 123;");
        assert!(!tree.has_error());

        orch.process(EditorEvent::WillDelete {
            paths: vec![folder.to_string_lossy().into_owned()],
        });
        assert!(orch.cache().get(&a).is_none());
        assert!(!orch.history().iter().any(|k| k == &a));
        assert_eq!(observer.triggers().len(), 1);
        assert!(observer.warnings().is_empty());
    }

    /// Observer that stamps triggers with paused tokio time
    #[derive(Default)]
    struct TimedObserver {
        fired: parking_lot::Mutex<Vec<(tokio::time::Instant, TriggerRequest)>>,
    }

    impl ContextObserver for TimedObserver {
        fn on_trigger(&self, request: TriggerRequest) {
            self.fired.lock().push((tokio::time::Instant::now(), request));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_debounces_in_tokio_time() {
        let temp_dir = TempDir::new().unwrap();
        let observer = Arc::new(TimedObserver::default());
        let orch = ContextOrchestrator::new(
            Workspace::new(temp_dir.path()),
            StubParser,
            observer.clone(),
            ContextSettings::default(),
        );
        let reader = orch.reader();
        let (handle, task) = orch.spawn();

        handle.send(opened("a.ts", "v0")).await.unwrap();
        for content in ["v1", "v2", "v3"] {
            handle.send(edited("a.ts", content)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let last_edit = tokio::time::Instant::now() - Duration::from_millis(10);

        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let fired = observer.fired.lock();
        assert_eq!(fired.len(), 1);
        let delay = fired[0].0 - last_edit;
        assert!(delay >= Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert!(delay < Duration::from_millis(DEFAULT_DEBOUNCE_MS + 20));
        assert_eq!(fired[0].1.coalesced, 3);
        assert_eq!(reader.get(&key("a.ts")).as_deref(), Some(&"V3".to_string()));
    }
}
