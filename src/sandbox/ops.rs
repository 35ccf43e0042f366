//! Filesystem operations confined to an [`AllowedRoots`] set.
//!
//! Each operation validates every path first, then checks preconditions,
//! then does I/O. Results are plain serde structs; the tool layer turns them
//! into protocol payloads.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, instrument};

use super::SandboxError;
use super::roots::{AllowedRoots, canonicalize_lenient};
use crate::fsutil;

/// Upper bound on `search_files` matches.
pub const SEARCH_RESULT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub relative_path: String,
    pub content: String,
}

/// Outcome of one path in a batch read. Failures never abort the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchRead {
    Ok(FileContent),
    Err {
        path: String,
        error: String,
        kind: &'static str,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PathOutcome {
    pub path: String,
    pub relative_path: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub path: String,
    pub relative_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub relative_path: String,
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub source: String,
    pub destination: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub pattern: String,
    pub matches: Vec<String>,
    /// Set when the walk stopped at [`SEARCH_RESULT_LIMIT`].
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub relative_path: String,
    pub size: u64,
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub is_dir: bool,
    pub is_file: bool,
    pub permissions: String,
}

/// Handle to the sandboxed filesystem. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Sandbox {
    roots: Arc<AllowedRoots>,
}

impl Sandbox {
    pub fn new(roots: AllowedRoots) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }

    pub fn roots(&self) -> &AllowedRoots {
        &self.roots
    }

    fn describe(&self, path: &Path) -> (String, String) {
        (path.display().to_string(), self.roots.relative(path))
    }

    /// Read a text file, optionally only its first `head` or last `tail`
    /// lines. `head` wins when both are given. Invalid UTF-8 is replaced.
    #[instrument(skip(self))]
    pub async fn read_text_file(
        &self,
        raw: &str,
        head: Option<usize>,
        tail: Option<usize>,
    ) -> Result<FileContent, SandboxError> {
        let target = self.roots.resolve(raw)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;
        if meta.is_dir() {
            return Err(SandboxError::IsADirectory(raw.to_string()));
        }

        let file = tokio::fs::File::open(&target)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;
        let content = match (head, tail) {
            (Some(n), _) => read_head(file, n).await,
            (None, Some(n)) => read_tail(file, n).await,
            (None, None) => read_all(file, meta.len()).await,
        }
        .map_err(|e| SandboxError::io(raw, e))?;

        debug!(path = %target.display(), bytes = content.len(), "Read file");
        let (path, relative_path) = self.describe(&target);
        Ok(FileContent {
            path,
            relative_path,
            content,
        })
    }

    /// Read several files; each path succeeds or fails on its own.
    #[instrument(skip(self, paths), fields(count = paths.len()))]
    pub async fn read_multiple_files(&self, paths: &[String]) -> Vec<BatchRead> {
        let mut results = Vec::with_capacity(paths.len());
        for raw in paths {
            match self.read_text_file(raw, None, None).await {
                Ok(content) => results.push(BatchRead::Ok(content)),
                Err(e) => results.push(BatchRead::Err {
                    path: raw.clone(),
                    error: e.to_string(),
                    kind: e.kind(),
                }),
            }
        }
        results
    }

    /// Create or replace a file. Parent directories are created as needed.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn write_file(&self, raw: &str, content: &str) -> Result<PathOutcome, SandboxError> {
        let target = self.roots.resolve(raw)?;
        if tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(SandboxError::IsADirectory(raw.to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::io(raw, e))?;
        }
        fsutil::write_atomic_async(target.clone(), content.as_bytes().to_vec())
            .await
            .map_err(|e| SandboxError::io(raw, e))?;

        debug!(path = %target.display(), "File written");
        let (path, relative_path) = self.describe(&target);
        Ok(PathOutcome {
            path,
            relative_path,
            status: "ok",
        })
    }

    /// `mkdir -p`. Succeeds if the directory already exists.
    #[instrument(skip(self))]
    pub async fn create_directory(&self, raw: &str) -> Result<PathOutcome, SandboxError> {
        let target = self.roots.resolve(raw)?;
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if !meta.is_dir() {
                return Err(SandboxError::AlreadyExists(raw.to_string()));
            }
        }
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;

        let (path, relative_path) = self.describe(&target);
        Ok(PathOutcome {
            path,
            relative_path,
            status: "ok",
        })
    }

    /// List a directory, sorted case-insensitively by name. Symlinks that
    /// lead outside the roots are left out.
    #[instrument(skip(self))]
    pub async fn list_directory(&self, raw: &str) -> Result<DirectoryListing, SandboxError> {
        let target = self.roots.resolve(raw)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;
        if !meta.is_dir() {
            return Err(SandboxError::NotADirectory(raw.to_string()));
        }

        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SandboxError::io(raw, e))?
        {
            let child = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            let is_dir = if file_type.is_symlink() {
                let Ok(resolved) = canonicalize_lenient(&child) else {
                    continue;
                };
                if !self.roots.contains(&resolved) {
                    debug!(entry = %child.display(), "Hiding symlink that leaves the sandbox");
                    continue;
                }
                tokio::fs::metadata(&resolved)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
            } else {
                file_type.is_dir()
            };

            let (path, relative_path) = self.describe(&child);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                path,
                relative_path,
            });
        }
        entries.sort_by_cached_key(|e| e.name.to_lowercase());

        let (path, relative_path) = self.describe(&target);
        Ok(DirectoryListing {
            path,
            relative_path,
            entries,
        })
    }

    /// Move or rename. Never overwrites an existing destination.
    ///
    /// The existence check and the rename are two steps; a destination
    /// created in between by another process may be replaced on platforms
    /// whose rename overwrites.
    #[instrument(skip(self))]
    pub async fn move_file(&self, source: &str, destination: &str) -> Result<MoveOutcome, SandboxError> {
        let from = self.roots.resolve(source)?;
        let to = self.roots.resolve(destination)?;

        tokio::fs::symlink_metadata(&from)
            .await
            .map_err(|e| SandboxError::io(source, e))?;
        if tokio::fs::symlink_metadata(&to).await.is_ok() {
            return Err(SandboxError::AlreadyExists(destination.to_string()));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::io(destination, e))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| SandboxError::io(source, e))?;

        debug!(from = %from.display(), to = %to.display(), "Moved");
        Ok(MoveOutcome {
            source: from.display().to_string(),
            destination: to.display().to_string(),
            status: "ok",
        })
    }

    /// Recursive case-insensitive substring search over paths relative to
    /// the search root.
    #[instrument(skip(self, exclude_patterns))]
    pub async fn search_files(
        &self,
        raw: &str,
        pattern: &str,
        exclude_patterns: &[String],
    ) -> Result<SearchResult, SandboxError> {
        if pattern.is_empty() {
            return Err(SandboxError::InvalidArgument(
                "pattern must not be empty".to_string(),
            ));
        }
        let excludes = exclude_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| SandboxError::InvalidArgument(format!("bad glob '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let base = self.roots.resolve(raw)?;
        let meta = tokio::fs::metadata(&base)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;
        if !meta.is_dir() {
            return Err(SandboxError::NotADirectory(raw.to_string()));
        }

        let roots = Arc::clone(&self.roots);
        let needle = pattern.to_lowercase();
        let walk_base = base.clone();
        let (matches, truncated) = tokio::task::spawn_blocking(move || {
            walk_matches(&roots, &walk_base, &needle, &excludes)
        })
        .await
        .map_err(|e| SandboxError::Io {
            path: raw.to_string(),
            source: std::io::Error::other(e),
        })?;

        debug!(count = matches.len(), truncated, "Search complete");
        Ok(SearchResult {
            path: base.display().to_string(),
            pattern: pattern.to_string(),
            matches,
            truncated,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_file_info(&self, raw: &str) -> Result<FileInfo, SandboxError> {
        let target = self.roots.resolve(raw)?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| SandboxError::io(raw, e))?;

        let (path, relative_path) = self.describe(&target);
        Ok(FileInfo {
            path,
            relative_path,
            size: meta.len(),
            modified: meta.modified().ok().map(rfc3339),
            created: meta.created().ok().map(rfc3339),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            permissions: permission_bits(&meta),
        })
    }

    pub fn list_allowed_directories(&self) -> Vec<String> {
        self.roots
            .roots()
            .iter()
            .map(|r| r.display().to_string())
            .collect()
    }
}

async fn read_all(mut file: tokio::fs::File, size_hint: u64) -> std::io::Result<String> {
    let mut bytes = Vec::with_capacity(size_hint as usize);
    file.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn read_head(file: tokio::fs::File, n: usize) -> std::io::Result<String> {
    let mut reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut line = Vec::new();
    for _ in 0..n {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        out.extend_from_slice(&line);
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Keeps at most `n` lines in memory while scanning to the end.
async fn read_tail(file: tokio::fs::File, n: usize) -> std::io::Result<String> {
    let mut reader = BufReader::new(file);
    let mut window: VecDeque<Vec<u8>> = VecDeque::with_capacity(n.min(4096));
    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if n == 0 {
            continue;
        }
        if window.len() == n {
            window.pop_front();
        }
        window.push_back(line);
    }
    let joined: Vec<u8> = window.into_iter().flatten().collect();
    Ok(String::from_utf8_lossy(&joined).into_owned())
}

fn is_excluded(excludes: &[glob::Pattern], relative: &Path) -> bool {
    let rel = relative.to_string_lossy();
    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    excludes
        .iter()
        .any(|p| p.matches(&rel) || p.matches(&name))
}

fn walk_matches(
    roots: &AllowedRoots,
    base: &Path,
    needle: &str,
    excludes: &[glob::Pattern],
) -> (Vec<String>, bool) {
    let mut matches = Vec::new();
    let walker = walkdir::WalkDir::new(base)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(base)
                .map(|rel| !is_excluded(excludes, rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let Ok(entry) = entry else { continue };
        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };
        if !relative.to_string_lossy().to_lowercase().contains(needle) {
            continue;
        }
        let within = canonicalize_lenient(entry.path())
            .map(|p| roots.contains(&p))
            .unwrap_or(false);
        if !within {
            continue;
        }
        if matches.len() >= SEARCH_RESULT_LIMIT {
            return (matches, true);
        }
        matches.push(entry.path().display().to_string());
    }
    (matches, false)
}

fn rfc3339(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("0o{:o}", meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "0o444".to_string()
    } else {
        "0o666".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Sandbox, PathBuf) {
        let dir = TempDir::new().unwrap();
        let roots = AllowedRoots::prepare([dir.path().join("root")]).unwrap();
        let primary = roots.primary().unwrap().to_path_buf();
        (dir, Sandbox::new(roots), primary)
    }

    #[tokio::test]
    async fn test_head_and_tail() {
        let (_dir, sandbox, root) = setup();
        std::fs::write(root.join("lines.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let head = sandbox.read_text_file("lines.txt", Some(2), None).await.unwrap();
        assert_eq!(head.content, "one\ntwo\n");

        let tail = sandbox.read_text_file("lines.txt", None, Some(2)).await.unwrap();
        assert_eq!(tail.content, "three\nfour\n");

        let both = sandbox.read_text_file("lines.txt", Some(1), Some(3)).await.unwrap();
        assert_eq!(both.content, "one\n");

        let none = sandbox.read_text_file("lines.txt", None, Some(0)).await.unwrap();
        assert_eq!(none.content, "");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (_dir, sandbox, root) = setup();
        std::fs::write(root.join("bin.dat"), [b'o', b'k', 0xff, b'\n']).unwrap();
        let file = sandbox.read_text_file("bin.dat", None, None).await.unwrap();
        assert!(file.content.starts_with("ok"));
        assert!(file.content.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_read_directory_is_rejected() {
        let (_dir, sandbox, _root) = setup();
        assert!(matches!(
            sandbox.read_text_file(".", None, None).await,
            Err(SandboxError::IsADirectory(_))
        ));
        assert!(matches!(
            sandbox.read_text_file("missing.txt", None, None).await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_refuses_directories() {
        let (_dir, sandbox, root) = setup();
        let out = sandbox.write_file("a/b/c.txt", "hi").await.unwrap();
        assert_eq!(out.relative_path, "a/b/c.txt");
        assert_eq!(std::fs::read_to_string(root.join("a/b/c.txt")).unwrap(), "hi");

        assert!(matches!(
            sandbox.write_file("a/b", "x").await,
            Err(SandboxError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_create_directory_over_file_fails() {
        let (_dir, sandbox, root) = setup();
        std::fs::write(root.join("taken"), "").unwrap();
        assert!(matches!(
            sandbox.create_directory("taken").await,
            Err(SandboxError::AlreadyExists(_))
        ));
        sandbox.create_directory("x/y").await.unwrap();
        sandbox.create_directory("x/y").await.unwrap();
        assert!(root.join("x/y").is_dir());
    }

    #[tokio::test]
    async fn test_listing_is_case_insensitive_sorted() {
        let (_dir, sandbox, root) = setup();
        std::fs::write(root.join("b.txt"), "").unwrap();
        std::fs::write(root.join("A.txt"), "").unwrap();
        std::fs::create_dir(root.join("c")).unwrap();

        let listing = sandbox.list_directory("").await.unwrap();
        let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["A.txt", "b.txt", "c"]);
        assert_eq!(listing.entries[2].kind, EntryKind::Directory);

        assert!(matches!(
            sandbox.list_directory("b.txt").await,
            Err(SandboxError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_search_respects_excludes_and_case() {
        let (_dir, sandbox, root) = setup();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::write(root.join("src/Report.md"), "").unwrap();
        std::fs::write(root.join("target/debug/report.bin"), "").unwrap();

        let result = sandbox
            .search_files(".", "REPORT", &["target".to_string()])
            .await
            .unwrap();
        assert_eq!(result.matches.len(), 1);
        assert!(result.matches[0].ends_with("Report.md"));
        assert!(!result.truncated);

        assert!(matches!(
            sandbox.search_files(".", "", &[]).await,
            Err(SandboxError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_file_info() {
        let (_dir, sandbox, root) = setup();
        std::fs::write(root.join("f.txt"), "12345").unwrap();
        let info = sandbox.get_file_info("f.txt").await.unwrap();
        assert_eq!(info.size, 5);
        assert!(info.is_file);
        assert!(!info.is_dir);
        assert!(info.permissions.starts_with("0o"));
        assert!(info.modified.is_some());
    }
}
