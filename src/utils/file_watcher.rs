use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use crate::constants::IGNORED_DIRECTORIES;

/// Events that we care about for the file system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(Vec<PathBuf>),
    Modified(Vec<PathBuf>),
    Deleted(Vec<PathBuf>),
}

/// A file system watcher that monitors changes in a directory
pub struct FileSystemWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<Result<Event, notify::Error>>,
}

impl FileSystemWatcher {
    /// Create a new file system watcher for the given path
    pub fn new(path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;

        watcher.watch(path, RecursiveMode::Recursive)?;

        Ok(Self {
            root: path.to_path_buf(),
            _watcher: watcher,
            rx,
        })
    }

    /// Check for any file system events (non-blocking)
    pub fn check_events(&self) -> Vec<FileEvent> {
        let mut events = Vec::new();
        while let Ok(result) = self.rx.try_recv() {
            self.collect(result, &mut events);
        }
        events
    }

    /// Block up to `timeout` for the first event, then drain what is queued
    pub fn wait_events(&self, timeout: Duration) -> Vec<FileEvent> {
        let mut events = Vec::new();
        if let Ok(result) = self.rx.recv_timeout(timeout) {
            self.collect(result, &mut events);
        }
        events.extend(self.check_events());
        events
    }

    fn collect(&self, result: Result<Event, notify::Error>, events: &mut Vec<FileEvent>) {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("File watcher error: {}", e);
                return;
            },
        };

        let paths: Vec<PathBuf> = event
            .paths
            .into_iter()
            // Ignore rules apply below the watched root only
            .filter(|path| {
                !Self::should_ignore_path(path.strip_prefix(&self.root).unwrap_or(path.as_path()))
            })
            .collect();
        if paths.is_empty() {
            return;
        }

        match event.kind {
            EventKind::Create(_) => events.push(FileEvent::Created(paths)),
            EventKind::Modify(modify_kind) => {
                use notify::event::{ModifyKind, RenameMode};
                match modify_kind {
                    ModifyKind::Data(_) | ModifyKind::Any => {
                        events.push(FileEvent::Modified(paths))
                    },
                    // The old name of a rename is gone as far as the cache cares
                    ModifyKind::Name(RenameMode::From) => events.push(FileEvent::Deleted(paths)),
                    ModifyKind::Name(RenameMode::To) => events.push(FileEvent::Created(paths)),
                    _ => {}, // Ignore metadata changes
                }
            },
            EventKind::Remove(_) => events.push(FileEvent::Deleted(paths)),
            _ => {},
        }
    }

    /// Hidden entries and build/vendor directories are never watched
    pub fn should_ignore_path(path: &Path) -> bool {
        path.components().any(|component| match component {
            Component::Normal(name) => name.to_str().is_some_and(|name| {
                (name.starts_with('.') && name.len() > 1) || IGNORED_DIRECTORIES.contains(&name)
            }),
            _ => false,
        })
    }
}
