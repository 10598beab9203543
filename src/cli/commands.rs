use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    app::{init_config, load_config, load_config_from, Config},
    cache::CacheStats,
    constants::WATCHER_POLL_INTERVAL_MS,
    context::{LanguageKind, PathKey, Symbol, TreeSitterParser, Workspace},
    runtime::{
        ContextObserver, ContextOrchestrator, EditorEvent, LoggingObserver, OrchestratorHandle,
        RecordingObserver, TriggerRequest,
    },
    trigger::{ManualClock, SessionId},
    utils::{log_error, log_info, log_warn, FileEvent, FileSystemWatcher},
};

use super::{Cli, Commands};

/// Session used for events synthesized from filesystem changes
const WATCH_SESSION: SessionId = SessionId(0);

/// Handle CLI subcommands
pub async fn handle_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Init => {
            println!("Initializing fimctx configuration...");
            init_config()?;
            println!("Configuration initialized successfully!");
            Ok(())
        },
        Commands::Watch { path } => {
            let config = resolve_config(cli)?;
            let root = workspace_root(path.as_deref())?;
            watch(&config, &root).await
        },
        Commands::Replay { file, path } => {
            let config = resolve_config(cli)?;
            let root = workspace_root(path.as_deref())?;
            let input = read_input(file)?;
            let steps = parse_replay(&input)?;
            let summary = replay(&config, &root, steps);
            print_summary(&summary);
            Ok(())
        },
    }
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => load_config_from(None, path),
        None => load_config(),
    }
}

fn workspace_root(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir().context("Could not determine current directory"),
    }
}

fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read events from stdin")?;
        Ok(input)
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read events from {}", file.display()))
    }
}

/// Orchestrator over tree-sitter with validated settings
fn build_orchestrator(
    config: &Config,
    root: &Path,
    observer: Arc<dyn ContextObserver>,
) -> ContextOrchestrator<TreeSitterParser> {
    let (settings, problems) = config.context_settings();
    for problem in &problems {
        log_warn("⚠️", problem);
    }
    ContextOrchestrator::new(
        Workspace::new(root),
        TreeSitterParser::new(config.max_parse_bytes()),
        observer,
        settings,
    )
}

/// One line of a replay script
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplayStep {
    /// Virtual milliseconds elapsed before this event
    #[serde(default)]
    pub after_ms: u64,
    #[serde(flatten)]
    pub event: EditorEvent,
}

/// Parse a JSON-lines replay script; blank lines and `#` comments are skipped
pub fn parse_replay(input: &str) -> Result<Vec<ReplayStep>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid event on line {}", index + 1))
        })
        .collect()
}

/// Everything a replay produced
#[derive(Debug)]
pub struct ReplaySummary {
    pub triggers: Vec<TriggerRequest>,
    pub warnings: Vec<String>,
    /// Final visit order, most recent first
    pub history: Vec<PathKey>,
    /// Outline of every cached file still in history
    pub outlines: Vec<(PathKey, Vec<Symbol>)>,
    pub stats: CacheStats,
}

/// Run a script against a fresh orchestrator on virtual time
///
/// The clock only moves by each step's `after_ms`, so debounce behavior is
/// reproducible. Unless the script shuts down, one final quiet period is
/// allowed to elapse after the last event.
pub fn replay(config: &Config, root: &Path, steps: Vec<ReplayStep>) -> ReplaySummary {
    let clock = ManualClock::new();
    let observer = Arc::new(RecordingObserver::new());
    let mut orchestrator =
        build_orchestrator(config, root, observer.clone()).with_clock(Arc::new(clock.clone()));

    let mut stopped = false;
    for step in steps {
        clock.advance(Duration::from_millis(step.after_ms));
        orchestrator.fire_expired();

        stopped = matches!(step.event, EditorEvent::Shutdown);
        orchestrator.process(step.event);
        if stopped {
            break;
        }
    }

    if !stopped {
        clock.advance(orchestrator.settings().debounce);
        orchestrator.fire_expired();
    }

    let reader = orchestrator.reader();
    let history = reader.history().to_vec();
    let outlines = reader
        .assemble(None, history.len())
        .into_iter()
        .map(|file| {
            let symbols = orchestrator.parser().outline(&file.tree);
            (file.key, symbols)
        })
        .collect();

    ReplaySummary {
        triggers: observer.triggers(),
        warnings: observer.warnings(),
        history,
        outlines,
        stats: orchestrator.cache().stats(),
    }
}

fn print_summary(summary: &ReplaySummary) {
    println!("Triggers ({}):", summary.triggers.len());
    for trigger in &summary.triggers {
        let order: Vec<String> = trigger.history.iter().map(|key| key.to_string()).collect();
        println!(
            "  • {} {} after {} edit(s); history [{}]",
            trigger.session,
            trigger
                .key
                .as_ref()
                .map(|key| key.to_string())
                .unwrap_or_else(|| "-".to_string()),
            trigger.coalesced,
            order.join(", ")
        );
    }

    if !summary.warnings.is_empty() {
        println!();
        println!("Warnings ({}):", summary.warnings.len());
        for warning in &summary.warnings {
            println!("  • {}", warning);
        }
    }

    println!();
    println!("History (most recent first):");
    for key in &summary.history {
        println!("  • {}", key);
    }

    println!();
    println!("Outlines:");
    for (key, symbols) in &summary.outlines {
        println!("  {}", key);
        for symbol in symbols {
            println!("    {:>4}  {:?} {}", symbol.line, symbol.kind, symbol.name);
        }
    }

    println!();
    println!("{}", summary.stats.format());
}

/// Feed filesystem changes under `root` to a live orchestrator until Ctrl-C
async fn watch(config: &Config, root: &Path) -> Result<()> {
    let orchestrator = build_orchestrator(config, root, Arc::new(LoggingObserver));
    let (handle, task) = orchestrator.spawn();

    let watcher = FileSystemWatcher::new(root)
        .with_context(|| format!("Failed to watch {}", root.display()))?;
    log_info("👀", format!("Watching {}", root.display()));

    let forward = handle.clone();
    let pump = tokio::task::spawn_blocking(move || pump_events(&watcher, &forward));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    log_info("👋", "Stopping");

    // The loop may already be gone; either way it is stopped
    let _ = handle.shutdown().await;
    if let Err(e) = task.await {
        log_error("❌", format!("Orchestrator task failed: {}", e));
    }
    pump.await.context("Watcher task failed")?;
    Ok(())
}

fn pump_events(watcher: &FileSystemWatcher, handle: &OrchestratorHandle) {
    let interval = Duration::from_millis(WATCHER_POLL_INTERVAL_MS);
    while !handle.is_closed() {
        for change in watcher.wait_events(interval) {
            for event in editor_events(change) {
                if handle.blocking_send(event).is_err() {
                    return;
                }
            }
        }
    }
}

/// Translate a filesystem change into the events an editor would send
fn editor_events(change: FileEvent) -> Vec<EditorEvent> {
    match change {
        FileEvent::Created(paths) => read_sources(paths)
            .into_iter()
            .map(|(path, content)| EditorEvent::Opened {
                session: WATCH_SESSION,
                path,
                content,
            })
            .collect(),
        FileEvent::Modified(paths) => read_sources(paths)
            .into_iter()
            .map(|(path, content)| EditorEvent::Edited {
                session: WATCH_SESSION,
                path,
                content,
            })
            .collect(),
        FileEvent::Deleted(paths) => vec![EditorEvent::WillDelete {
            paths: paths
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
        }],
    }
}

fn read_sources(paths: Vec<PathBuf>) -> Vec<(String, String)> {
    paths
        .into_iter()
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .and_then(LanguageKind::from_extension)
                .is_some()
        })
        .filter_map(|path| match std::fs::read_to_string(&path) {
            Ok(content) => Some((path.to_string_lossy().into_owned(), content)),
            Err(e) => {
                tracing::debug!("Skipping {}: {}", path.display(), e);
                None
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SymbolKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SCRIPT: &str = r#"
# open two files, edit one in a burst, then delete the other
{"event":"opened","session":1,"path":"web/a.ts","content":"function first() {}"}
{"event":"opened","session":1,"path":"lib/b.rs","content":"fn helper() {}"}
{"after_ms":10,"event":"edited","session":1,"path":"lib/b.rs","content":"fn helper() { 1 }"}
{"after_ms":10,"event":"edited","session":1,"path":"lib/b.rs","content":"fn helper() { 12 }"}
{"after_ms":500,"event":"will_delete","paths":["web"]}
"#;

    #[test]
    fn test_parse_replay_skips_comments() {
        let steps = parse_replay(SCRIPT).unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].after_ms, 0);
        assert_eq!(steps[4].after_ms, 500);
        assert_eq!(
            steps[4].event,
            EditorEvent::WillDelete {
                paths: vec!["web".to_string()]
            }
        );
    }

    #[test]
    fn test_parse_replay_reports_line() {
        let err = parse_replay("{\"event\":\"shutdown\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_replay_script() {
        let temp_dir = TempDir::new().unwrap();
        let steps = parse_replay(SCRIPT).unwrap();

        let summary = replay(&Config::default(), temp_dir.path(), steps);

        assert_eq!(summary.triggers.len(), 1);
        let trigger = &summary.triggers[0];
        assert_eq!(trigger.coalesced, 2);
        assert_eq!(trigger.key, Some(PathKey::new("lib/b.rs")));
        assert_eq!(
            trigger.history.to_vec(),
            vec![PathKey::new("lib/b.rs"), PathKey::new("web/a.ts")]
        );

        assert!(summary.warnings.is_empty());
        assert_eq!(summary.history, vec![PathKey::new("lib/b.rs")]);
        assert_eq!(summary.outlines.len(), 1);
        let (key, symbols) = &summary.outlines[0];
        assert_eq!(key, &PathKey::new("lib/b.rs"));
        assert_eq!(symbols[0].name, "helper");
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert_eq!(summary.stats.live_entries, 1);
    }

    #[test]
    fn test_deleted_change_becomes_will_delete() {
        let events = editor_events(FileEvent::Deleted(vec![PathBuf::from("/ws/gone")]));
        assert_eq!(
            events,
            vec![EditorEvent::WillDelete {
                paths: vec!["/ws/gone".to_string()]
            }]
        );
    }

    #[test]
    fn test_unsupported_files_are_not_read() {
        let temp_dir = TempDir::new().unwrap();
        let text = temp_dir.path().join("notes.txt");
        let source = temp_dir.path().join("main.rs");
        std::fs::write(&text, "hello").unwrap();
        std::fs::write(&source, "fn main() {}").unwrap();

        let events = editor_events(FileEvent::Modified(vec![text, source.clone()]));
        assert_eq!(
            events,
            vec![EditorEvent::Edited {
                session: WATCH_SESSION,
                path: source.to_string_lossy().into_owned(),
                content: "fn main() {}".to_string(),
            }]
        );
    }
}
