use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use url::Url;

use crate::utils::ContextError;

/// Canonical identity of a file, relative to the workspace root
///
/// Keys use `/` separators and contain no `.` or `..` segments. Files outside
/// the workspace keep their normalized absolute path, which can never collide
/// with a relative key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PathKey(String);

impl PathKey {
    /// Build a key from an already workspace-relative path string
    pub fn new(relative: &str) -> Self {
        let absolute = relative.starts_with('/');
        let mut segments: Vec<&str> = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {},
                ".." => {
                    if matches!(segments.last(), Some(last) if *last != "..") {
                        segments.pop();
                    } else if !absolute {
                        segments.push("..");
                    }
                },
                other => segments.push(other),
            }
        }

        let joined = segments.join("/");
        if absolute {
            Self(format!("/{}", joined))
        } else {
            Self(joined)
        }
    }

    /// The key of the workspace root itself; every key lies under it
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` equals `prefix` or lies below it, compared per segment
    pub fn is_under(&self, prefix: &PathKey) -> bool {
        if prefix.is_root() {
            return !self.0.starts_with('/');
        }
        match self.0.strip_prefix(prefix.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('/') || prefix.0.ends_with('/'),
            None => false,
        }
    }

    /// File extension of the last segment, if any
    pub fn extension(&self) -> Option<&str> {
        let name = self.0.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<String> for PathKey {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for PathKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<PathKey> for String {
    fn from(value: PathKey) -> Self {
        value.0
    }
}

/// Maps the many ways an editor names a file onto one [`PathKey`]
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root` (made absolute and normalized)
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            root: normalize(&absolute),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key for a path given either absolute or relative to the workspace root
    pub fn key_for(&self, path: &Path) -> PathKey {
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        };

        match absolute.strip_prefix(&self.root) {
            Ok(relative) => PathKey::new(&join_segments(relative)),
            Err(_) => PathKey::new(&format!("/{}", join_segments(&absolute))),
        }
    }

    /// Key for an editor document identifier: a `file://` URI or a plain path
    pub fn key_for_uri(&self, uri: &str) -> Result<PathKey, ContextError> {
        match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    ContextError::Configuration(format!("Not a local file URI: {}", uri))
                })?;
                Ok(self.key_for(&path))
            },
            Ok(url) if url.scheme().len() > 1 => Err(ContextError::Configuration(format!(
                "Unsupported URI scheme '{}' in {}",
                url.scheme(),
                uri
            ))),
            // Single-letter schemes are Windows drive letters, not URIs
            _ => Ok(self.key_for(Path::new(uri))),
        }
    }

    /// Absolute on-disk location of a key
    pub fn path_for(&self, key: &PathKey) -> PathBuf {
        if key.as_str().starts_with('/') {
            PathBuf::from(key.as_str())
        } else if key.is_root() {
            self.root.clone()
        } else {
            key.as_str()
                .split('/')
                .fold(self.root.clone(), |path, segment| path.join(segment))
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn join_segments(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
