use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::context::{PathKey, Workspace};
use crate::utils::ContextError;

/// What a directory entry is, as far as deletion cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// Directory listing capability used while walking a deleted tree
#[cfg_attr(test, mockall::automock)]
pub trait DirectoryEnumerator: Send + Sync {
    fn kind(&self, path: &Path) -> io::Result<EntryKind>;

    fn read_dir(&self, path: &Path) -> io::Result<Vec<(String, EntryKind)>>;
}

/// Enumerates the real filesystem without following symlinks
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEnumerator;

impl FsEnumerator {
    fn classify(file_type: fs::FileType) -> EntryKind {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() || file_type.is_symlink() {
            // A link is a file-like document to the editor; never descend through it
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

impl DirectoryEnumerator for FsEnumerator {
    fn kind(&self, path: &Path) -> io::Result<EntryKind> {
        Ok(Self::classify(fs::symlink_metadata(path)?.file_type()))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<(String, EntryKind)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push((name, Self::classify(entry.file_type()?)));
        }
        entries.sort();
        Ok(entries)
    }
}

/// Result of walking one deleted root
#[derive(Debug, Default)]
pub struct DeletionReport {
    /// Key of the deleted root itself
    pub root: Option<PathKey>,
    /// Every file key the walk discovered, in discovery order
    pub files: Vec<PathKey>,
    /// Directories that could not be read, after retries
    pub failures: Vec<ContextError>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Iterative worklist walk over a root that is about to be deleted
///
/// A directory that still fails after `retries` extra attempts is recorded and
/// skipped; siblings already on the worklist are still visited.
pub fn collect_deleted_files(
    workspace: &Workspace,
    enumerator: &dyn DirectoryEnumerator,
    root: &Path,
    retries: usize,
) -> DeletionReport {
    let mut report = DeletionReport {
        root: Some(workspace.key_for(root)),
        ..Default::default()
    };

    match enumerator.kind(root) {
        Ok(EntryKind::File) => {
            report.files.push(workspace.key_for(root));
            return report;
        },
        Ok(EntryKind::Directory) => {},
        Ok(EntryKind::Other) => return report,
        // Already gone (e.g. reported after the fact by a watcher)
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Deleted root {} no longer exists", root.display());
            return report;
        },
        Err(e) => {
            warn!("Cannot stat deleted root {}: {}", root.display(), e);
            report.failures.push(ContextError::IoEnumeration {
                path: root.to_path_buf(),
                source: e,
            });
            return report;
        },
    }

    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(directory) = stack.pop() {
        let entries = match read_dir_with_retry(enumerator, &directory, retries) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", directory.display(), e);
                report.failures.push(ContextError::IoEnumeration {
                    path: directory,
                    source: e,
                });
                continue;
            },
        };

        for (name, kind) in entries {
            let child = directory.join(&name);
            match kind {
                EntryKind::Directory => stack.push(child),
                EntryKind::File => report.files.push(workspace.key_for(&child)),
                EntryKind::Other => {},
            }
        }
    }

    debug!(
        "Deletion walk of {} found {} file(s), {} failure(s)",
        root.display(),
        report.files.len(),
        report.failures.len()
    );
    report
}

fn read_dir_with_retry(
    enumerator: &dyn DirectoryEnumerator,
    directory: &Path,
    retries: usize,
) -> io::Result<Vec<(String, EntryKind)>> {
    let mut attempt = 0;
    loop {
        match enumerator.read_dir(directory) {
            Ok(entries) => return Ok(entries),
            Err(e) if attempt < retries && e.kind() != io::ErrorKind::NotFound => {
                attempt += 1;
                debug!(
                    "Retrying {} after error ({}/{}): {}",
                    directory.display(),
                    attempt,
                    retries,
                    e
                );
            },
            Err(e) => return Err(e),
        }
    }
}
