//! Allowed-root set and canonical path resolution.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use super::SandboxError;

/// Symlink hops followed before a path is declared a loop.
const MAX_SYMLINK_HOPS: usize = 40;

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Canonicalize `path` without requiring it to exist.
///
/// Existing components are resolved against the filesystem: symlinks are
/// spliced in (dangling ones included, since a later create would follow
/// them) and `..` pops the already-resolved prefix. Components past the
/// first missing one are appended lexically.
pub fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut pending: VecDeque<OsString> = absolute
        .components()
        .map(|c| c.as_os_str().to_os_string())
        .collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0usize;

    while let Some(part) = pending.pop_front() {
        let Some(component) = Path::new(&part).components().next() else {
            continue;
        };
        match component {
            Component::Prefix(prefix) => resolved = PathBuf::from(prefix.as_os_str()),
            Component::RootDir => resolved.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                match std::fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidInput,
                                "too many levels of symbolic links",
                            ));
                        }
                        let target = std::fs::read_link(&candidate)?;
                        // Relative targets resolve against the link's directory,
                        // which is `resolved` as it stands.
                        for part in target.components().rev() {
                            pending.push_front(part.as_os_str().to_os_string());
                        }
                    }
                    _ => resolved = candidate,
                }
            }
        }
    }

    Ok(resolved)
}

/// Immutable set of canonical directories that path operations may touch.
///
/// The first root is the primary one: relative paths and the empty path
/// resolve against it. An empty set rejects everything.
#[derive(Debug, Clone, Default)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Canonicalize the given roots as they are on disk now.
    pub fn new<I, P>(roots: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut canonical: Vec<PathBuf> = Vec::new();
        for root in roots {
            let raw = root.as_ref();
            let expanded = expand_tilde(&raw.to_string_lossy());
            let resolved = canonicalize_lenient(&expanded)
                .map_err(|e| SandboxError::io(&raw.display().to_string(), e))?;
            if !canonical.contains(&resolved) {
                canonical.push(resolved);
            }
        }
        Ok(Self { roots: canonical })
    }

    /// Startup form: create missing roots and refuse ones that are files.
    pub fn prepare<I, P>(roots: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut prepared = Vec::new();
        for root in roots {
            let raw = root.as_ref().display().to_string();
            let path = expand_tilde(&raw);
            if path.exists() && !path.is_dir() {
                return Err(SandboxError::NotADirectory(raw));
            }
            std::fs::create_dir_all(&path).map_err(|e| SandboxError::io(&raw, e))?;
            prepared.push(path);
        }
        let roots = Self::new(prepared)?;
        debug!(roots = ?roots.roots, "Allowed directories ready");
        Ok(roots)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn primary(&self) -> Result<&Path, SandboxError> {
        self.roots
            .first()
            .map(PathBuf::as_path)
            .ok_or(SandboxError::NoRoots)
    }

    /// Whether an already canonical path equals or descends from a root.
    ///
    /// The comparison is per component, so `/data-old` is not inside `/data`.
    pub fn contains(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| canonical.starts_with(root))
    }

    /// Resolve a caller-supplied path to a canonical path inside the roots.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        let primary = self.primary()?;
        let trimmed = raw.trim();

        let candidate = if trimmed.is_empty() || trimmed == "." || trimmed == "/" {
            primary.to_path_buf()
        } else if trimmed.starts_with('~') {
            expand_tilde(trimmed)
        } else {
            let path = Path::new(trimmed);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                primary.join(path)
            }
        };

        let canonical = canonicalize_lenient(&candidate).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput => SandboxError::InvalidArgument(format!("{}: {}", raw, e)),
            _ => SandboxError::io(raw, e),
        })?;

        if !self.contains(&canonical) {
            warn!(path = raw, "Rejected path outside allowed directories");
            return Err(SandboxError::OutsideRoots(raw.to_string()));
        }
        Ok(canonical)
    }

    /// Path relative to the root that contains it, for display.
    pub fn relative(&self, canonical: &Path) -> String {
        self.roots
            .iter()
            .find_map(|root| canonical.strip_prefix(root).ok())
            .map(|rel| {
                let s = rel.display().to_string();
                if s.is_empty() { ".".to_string() } else { s }
            })
            .unwrap_or_else(|| canonical.display().to_string())
    }
}
