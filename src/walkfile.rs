//! The durable per-command record and its on-disk codec.
//!
//! A walk file stores, for one (command, walk path) pair: the verbatim
//! command text, informational timing, and the hash of every path the
//! command touched, keyed by access kind. The format is line-oriented text:
//!
//! ```text
//! walk-format: 1
//! command: cc -c -o a.o a.c
//! started: 2026-08-02T10:30:00.000000Z
//! duration: 0.412733
//! r 900150983cd24fb0d6963f7d28e17f72 /src/a.c
//! w 5eb63bbbe01eeed093cb22bb8f5acdc3 /src/a.o
//! r- - /src/maybe.h
//! ```
//!
//! A zero-length file is the interrupt sentinel: the engine truncates the
//! walk file before running a command and only replaces it (atomic rename)
//! after the run finished, so a crash at any point leaves either the old
//! complete record or the zero-length marker, never a torn write.
//!
//! Writer and reader must be the same build; the version line exists so a
//! record from a different build is treated as invalid rather than
//! misparsed. Command text and paths are stored with backslash escaping so
//! embedded newlines survive the line-oriented form.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::access::AccessKind;
use crate::error::EngineError;
use crate::hasher::ContentHash;

/// Current walk-file format version.
pub const WALK_FORMAT_VERSION: u32 = 1;

/// Result of loading a walk file from disk.
#[derive(Debug)]
pub enum LoadOutcome {
    /// No file at the walk path: the command never ran.
    Missing,
    /// Zero-length file: a previous run was interrupted before completion.
    Interrupted,
    /// The file exists but cannot be parsed; treated as no prior record.
    Invalid(String),
    /// A complete prior record.
    Loaded(WalkFile),
}

/// One recorded access: kind plus the content hash at end of run.
pub type RecordedAccess = (AccessKind, ContentHash);

/// The parsed (or to-be-written) record for one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkFile {
    /// Verbatim command text as supplied by the caller.
    pub command: String,
    /// When the run started (informational).
    pub started: DateTime<Utc>,
    /// How long the run took (informational).
    pub duration: Duration,
    /// Accessed paths with their folded kind and end-of-run hash.
    pub accesses: BTreeMap<PathBuf, RecordedAccess>,
}

impl WalkFile {
    /// Create an empty record for a finished run.
    ///
    /// Timestamps are truncated to microseconds so the record compares
    /// equal after a serialize/parse round trip.
    #[must_use]
    pub fn new(command: String, started: DateTime<Utc>, duration: Duration) -> Self {
        let started = started
            .with_nanosecond(started.nanosecond() / 1000 * 1000)
            .unwrap_or(started);
        let duration = Duration::from_micros(duration.as_micros() as u64);
        Self {
            command,
            started,
            duration,
            accesses: BTreeMap::new(),
        }
    }

    /// Record one path.
    ///
    /// A failed read always carries the absent hash, whatever the caller
    /// passed; the record must mean "this path did not exist".
    pub fn insert(&mut self, path: PathBuf, kind: AccessKind, hash: ContentHash) {
        let hash = if kind == AccessKind::FailedRead {
            ContentHash::Absent
        } else {
            hash
        };
        self.accesses.insert(path, (kind, hash));
    }

    /// Serialize to the on-disk text form.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("walk-format: {WALK_FORMAT_VERSION}\n"));
        out.push_str(&format!("command: {}\n", escape(&self.command)));
        out.push_str(&format!(
            "started: {}\n",
            self.started.to_rfc3339_opts(SecondsFormat::Micros, true)
        ));
        out.push_str(&format!(
            "duration: {}.{:06}\n",
            self.duration.as_secs(),
            self.duration.subsec_micros()
        ));
        for (path, (kind, hash)) in &self.accesses {
            out.push_str(&format!(
                "{} {} {}\n",
                kind.token(),
                hash.to_hex(),
                escape(&path.to_string_lossy())
            ));
        }
        out
    }

    /// Parse the on-disk text form.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed line. Callers downgrade
    /// this to "no prior record".
    pub fn parse(text: &str) -> Result<WalkFile, String> {
        let mut lines = text.lines();

        let version = lines
            .next()
            .and_then(|l| l.strip_prefix("walk-format: "))
            .ok_or_else(|| "missing format header".to_string())?;
        if version.parse::<u32>() != Ok(WALK_FORMAT_VERSION) {
            return Err(format!("unsupported format version: {version}"));
        }

        let command = lines
            .next()
            .and_then(|l| l.strip_prefix("command: "))
            .map(unescape)
            .ok_or_else(|| "missing command line".to_string())?;

        let started = lines
            .next()
            .and_then(|l| l.strip_prefix("started: "))
            .ok_or_else(|| "missing started line".to_string())?;
        let started = DateTime::parse_from_rfc3339(started)
            .map_err(|e| format!("bad started timestamp: {e}"))?
            .with_timezone(&Utc);

        let duration = lines
            .next()
            .and_then(|l| l.strip_prefix("duration: "))
            .ok_or_else(|| "missing duration line".to_string())?;
        let duration = parse_duration(duration)?;

        let mut accesses = BTreeMap::new();
        for line in lines {
            let mut fields = line.splitn(3, ' ');
            let kind = fields
                .next()
                .and_then(AccessKind::from_token)
                .ok_or_else(|| format!("bad access kind in line: {line}"))?;
            let hash = fields
                .next()
                .and_then(ContentHash::from_hex)
                .ok_or_else(|| format!("bad hash in line: {line}"))?;
            let path = fields
                .next()
                .ok_or_else(|| format!("missing path in line: {line}"))?;
            if kind == AccessKind::FailedRead && !hash.is_absent() {
                return Err(format!("failed read with a content hash: {line}"));
            }
            accesses.insert(PathBuf::from(unescape(path)), (kind, hash));
        }

        Ok(WalkFile {
            command,
            started,
            duration,
            accesses,
        })
    }

    /// Load the record at `path`, classifying missing/empty/corrupt files.
    ///
    /// # Errors
    ///
    /// Only genuine I/O failures (permissions, hardware) are errors;
    /// absence and corruption are [`LoadOutcome`] variants.
    pub fn load(path: &Path) -> Result<LoadOutcome, EngineError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
            Err(e) => return Err(EngineError::io(path, e)),
        };
        if bytes.is_empty() {
            return Ok(LoadOutcome::Interrupted);
        }
        match WalkFile::parse(&String::from_utf8_lossy(&bytes)) {
            Ok(walk) => Ok(LoadOutcome::Loaded(walk)),
            Err(detail) => Ok(LoadOutcome::Invalid(detail)),
        }
    }

    /// Persist the record at `path` with atomic-rename discipline.
    ///
    /// The text is written to a sibling temp file and renamed over the
    /// target, so concurrent readers see either the old record or the new
    /// one, never a partial write.
    pub fn store(&self, path: &Path) -> Result<(), EngineError> {
        ensure_parent_dir(path)?;
        let tmp = sibling(path, "-tmp");
        fs::write(&tmp, self.serialize()).map_err(|e| EngineError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }

    /// Write the zero-length interrupt sentinel at `path`.
    ///
    /// Called before a command runs; if the engine dies before [`store`]
    /// replaces it, the next invocation sees [`LoadOutcome::Interrupted`]
    /// and re-runs the command.
    pub fn truncate(path: &Path) -> Result<(), EngineError> {
        ensure_parent_dir(path)?;
        let file = fs::File::create(path).map_err(|e| EngineError::io(path, e))?;
        file.sync_all().map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }
}

/// Path of a sibling file next to `path` with `suffix` appended to the name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    name.push_str(suffix);
    path.with_file_name(name)
}

fn ensure_parent_dir(path: &Path) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
    }
    Ok(())
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let (secs, micros) = s
        .split_once('.')
        .ok_or_else(|| format!("bad duration: {s}"))?;
    let secs: u64 = secs.parse().map_err(|_| format!("bad duration: {s}"))?;
    if micros.len() != 6 {
        return Err(format!("bad duration: {s}"));
    }
    let micros: u32 = micros.parse().map_err(|_| format!("bad duration: {s}"))?;
    Ok(Duration::new(secs, micros * 1000))
}

/// Escape backslashes and line terminators so arbitrary text fits on one
/// line. `\r` is escaped too: `str::lines` would otherwise eat one at the
/// end of a line.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape`]. Unknown escapes pass through verbatim.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
