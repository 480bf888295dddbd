//! Access kinds, trace events, and the access-log builder.
//!
//! Tracer backends report raw events ("process P opened Q for read",
//! "renamed A to B"). [`AccessLogBuilder`] turns one run's event stream into
//! an [`AccessLog`]: a normalized map from absolute, canonicalized path to
//! the merged [`AccessKind`] the command performed on it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

/// How a command accessed one path, folded over the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Opened for reading and the open succeeded.
    Read,
    /// Opened for writing.
    Write,
    /// Read and written during the same run.
    ReadWrite,
    /// Opened for reading but the open failed (ENOENT or similar).
    ///
    /// Recorded so that the command re-runs if the probed path appears.
    FailedRead,
}

impl AccessKind {
    /// Combine two accesses to the same path.
    ///
    /// The merge is commutative; repeated accesses fold in any order.
    #[must_use]
    pub fn merge(self, other: AccessKind) -> AccessKind {
        use AccessKind::{FailedRead, Read, ReadWrite, Write};
        match (self, other) {
            (ReadWrite, _) | (_, ReadWrite) => ReadWrite,
            (Read, Write) | (Write, Read) => ReadWrite,
            (Write, FailedRead) | (FailedRead, Write) => ReadWrite,
            (Read, FailedRead) | (FailedRead, Read) => Read,
            (Read, Read) => Read,
            (Write, Write) => Write,
            (FailedRead, FailedRead) => FailedRead,
        }
    }

    /// Whether the access wrote the path.
    #[must_use]
    pub fn involves_write(self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::ReadWrite)
    }

    /// Short on-disk token used by the walk-file codec.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            AccessKind::Read => "r",
            AccessKind::Write => "w",
            AccessKind::ReadWrite => "rw",
            AccessKind::FailedRead => "r-",
        }
    }

    /// Decode the token produced by [`token`](Self::token).
    #[must_use]
    pub fn from_token(s: &str) -> Option<AccessKind> {
        match s {
            "r" => Some(AccessKind::Read),
            "w" => Some(AccessKind::Write),
            "rw" => Some(AccessKind::ReadWrite),
            "r-" => Some(AccessKind::FailedRead),
            _ => None,
        }
    }
}

/// One raw observation from a tracer backend.
///
/// Paths may be relative; the builder resolves them against the recorded
/// working directory of `pid` at event time. Backends that resolve paths
/// themselves (the preload shim) report absolute paths and a fixed pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A file-opening call.
    Open {
        /// Process that performed the open.
        pid: u32,
        /// Path as reported by the backend.
        path: PathBuf,
        /// Read/write disposition, already folded from open flags.
        kind: AccessKind,
    },
    /// A successful rename.
    Rename {
        /// Process that performed the rename.
        pid: u32,
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
    },
    /// A successful unlink.
    Unlink {
        /// Process that performed the unlink.
        pid: u32,
        /// Removed path.
        path: PathBuf,
    },
    /// A successful working-directory change.
    Chdir {
        /// Process whose cwd changed.
        pid: u32,
        /// New working directory.
        path: PathBuf,
    },
}

/// Path prefixes excluded from access logs.
///
/// Matching is textual prefix matching (so `/etc/ld.so` covers
/// `/etc/ld.so.cache`). The defaults cover pseudo-filesystems and loader
/// metadata whose content churns without affecting command output, plus the
/// system temp tree where the engine keeps its own trace scratch files.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    prefixes: Vec<String>,
}

impl IgnoreSet {
    /// The default ignore prefixes.
    #[must_use]
    pub fn standard() -> Self {
        let mut prefixes = vec![
            "/dev/".to_string(),
            "/proc/".to_string(),
            "/sys/".to_string(),
            "/etc/ld.so".to_string(),
        ];
        let tmp = std::env::temp_dir();
        prefixes.push(format!("{}/", tmp.to_string_lossy().trim_end_matches('/')));
        Self { prefixes }
    }

    /// Add additional prefixes (from configuration).
    #[must_use]
    pub fn with_extra(mut self, extra: &[String]) -> Self {
        self.prefixes.extend(extra.iter().cloned());
        self
    }

    /// Whether `path` falls under any ignored prefix.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.prefixes.iter().any(|p| text.starts_with(p.as_str()))
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Normalized access log for one command run: path → folded access kind.
pub type AccessLog = BTreeMap<PathBuf, AccessKind>;

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Used for paths that do not exist (failed reads, unlinked files), where
/// `fs::canonicalize` cannot help.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` against `base` and canonicalize the result.
///
/// Symlinks are resolved where the path exists; otherwise the path is
/// normalized lexically.
#[must_use]
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    std::fs::canonicalize(&absolute).unwrap_or_else(|_| normalize_lexically(&absolute))
}

/// Builds an [`AccessLog`] from a tracer event stream.
///
/// Tracks a working directory per pid (children start from the engine cwd),
/// resolves and canonicalizes every path, folds repeated accesses with
/// [`AccessKind::merge`], applies rename/unlink transfer rules, and drops
/// directories, ignored prefixes, and the walk path itself.
#[derive(Debug)]
pub struct AccessLogBuilder {
    initial_cwd: PathBuf,
    cwds: HashMap<u32, PathBuf>,
    entries: AccessLog,
    ignore: IgnoreSet,
    excluded: Vec<PathBuf>,
}

impl AccessLogBuilder {
    /// Create a builder for one command run.
    ///
    /// `excluded` holds exact paths never to record: the walk path and the
    /// tracer scratch file.
    #[must_use]
    pub fn new(ignore: IgnoreSet, excluded: Vec<PathBuf>) -> Self {
        let initial_cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let excluded = excluded
            .iter()
            .map(|p| resolve_path(&initial_cwd, p))
            .collect();
        Self {
            initial_cwd,
            cwds: HashMap::new(),
            entries: AccessLog::new(),
            ignore,
            excluded,
        }
    }

    fn cwd_of(&self, pid: u32) -> &Path {
        self.cwds
            .get(&pid)
            .map_or(self.initial_cwd.as_path(), PathBuf::as_path)
    }

    fn resolve(&self, pid: u32, path: &Path) -> PathBuf {
        resolve_path(self.cwd_of(pid), path)
    }

    fn skip(&self, path: &Path) -> bool {
        self.ignore.matches(path) || self.excluded.iter().any(|e| e.as_path() == path)
    }

    /// Feed one event into the log.
    pub fn push(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Open { pid, path, kind } => {
                let path = self.resolve(pid, &path);
                if self.skip(&path) || path.is_dir() {
                    return;
                }
                let merged = match self.entries.get(&path) {
                    Some(prev) => prev.merge(kind),
                    None => kind,
                };
                self.entries.insert(path, merged);
            }
            TraceEvent::Rename { pid, from, to } => {
                let from = self.resolve(pid, &from);
                let to = self.resolve(pid, &to);
                // A write-then-rename is recorded as a plain write of the
                // final name; renaming a path we never saw written tells us
                // nothing reliable, so both names are dropped.
                match self.entries.remove(&from) {
                    Some(kind) if kind.involves_write() => {
                        if !self.skip(&to) {
                            self.entries.insert(to, kind);
                        }
                    }
                    _ => {
                        self.entries.remove(&to);
                    }
                }
            }
            TraceEvent::Unlink { pid, path } => {
                let path = self.resolve(pid, &path);
                self.entries.remove(&path);
            }
            TraceEvent::Chdir { pid, path } => {
                let path = self.resolve(pid, &path);
                self.cwds.insert(pid, path);
            }
        }
    }

    /// Finish the run and return the normalized log.
    #[must_use]
    pub fn finish(self) -> AccessLog {
        self.entries
    }
}
