//! MD5 content hashing with a per-run cache.
//!
//! The engine decides whether a command needs to re-run by comparing the
//! current content hash of every file the previous run touched against the
//! hash recorded in the walk file. MD5 is used for its fixed 128-bit width;
//! the on-disk walk-file format depends on it.
//!
//! A path that does not exist (or is a directory, or otherwise not a regular
//! file) hashes to the distinguished [`ContentHash::Absent`] sentinel. This
//! is load-bearing: a command that probed for a missing header records
//! `Absent`, and the record stops validating the moment the header appears.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::EngineError;

/// Width of the content digest in bytes.
pub const HASH_LEN: usize = 16;

/// Read buffer size for streaming file hashing.
const CHUNK_SIZE: usize = 64 * 1024;

/// Content hash of a path: a 128-bit MD5 digest, or `Absent` for a path
/// that is not a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentHash {
    /// The path does not exist or is not a regular file.
    Absent,
    /// MD5 digest of the file content.
    Digest([u8; HASH_LEN]),
}

impl ContentHash {
    /// Whether this hash is the absent sentinel.
    #[must_use]
    pub fn is_absent(self) -> bool {
        self == ContentHash::Absent
    }

    /// Encode as lowercase hex, or `-` for the absent sentinel.
    #[must_use]
    pub fn to_hex(self) -> String {
        match self {
            ContentHash::Absent => "-".to_string(),
            ContentHash::Digest(bytes) => {
                let mut s = String::with_capacity(HASH_LEN * 2);
                for b in bytes {
                    s.push_str(&format!("{b:02x}"));
                }
                s
            }
        }
    }

    /// Decode the encoding produced by [`to_hex`](Self::to_hex).
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s == "-" {
            return Some(ContentHash::Absent);
        }
        if s.len() != HASH_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ContentHash::Digest(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash the content of a regular file.
///
/// Returns [`ContentHash::Absent`] when the path does not exist or is not a
/// regular file. Other I/O errors (e.g. permission denied, disk failure)
/// propagate as [`EngineError::Io`].
pub fn hash_file(path: &Path) -> Result<ContentHash, EngineError> {
    match std::fs::metadata(path) {
        Ok(meta) if !meta.is_file() => return Ok(ContentHash::Absent),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ContentHash::Absent),
        Err(e) => return Err(EngineError::io(path, e)),
    }

    let mut file = match File::open(path) {
        Ok(f) => f,
        // The file can vanish between the metadata call and the open.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ContentHash::Absent),
        Err(e) => return Err(EngineError::io(path, e)),
    };

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| EngineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; HASH_LEN];
    bytes.copy_from_slice(&digest);
    Ok(ContentHash::Digest(bytes))
}

/// Per-run memoization of [`hash_file`] results, keyed by path.
///
/// The cache is owned by the engine and lives for one engine value; it is
/// never persisted. Workers look paths up concurrently, so the map sits
/// behind a mutex. Entries for paths a command wrote must be invalidated
/// before re-hashing (the engine does this after every run).
#[derive(Debug, Default)]
pub struct HashCache {
    entries: Mutex<HashMap<PathBuf, ContentHash>>,
}

impl HashCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `path`, reusing a previously computed result when available.
    pub fn hash(&self, path: &Path) -> Result<ContentHash, EngineError> {
        if let Some(hash) = self.entries.lock().expect("hash cache poisoned").get(path) {
            return Ok(*hash);
        }
        let hash = hash_file(path)?;
        self.entries
            .lock()
            .expect("hash cache poisoned")
            .insert(path.to_path_buf(), hash);
        Ok(hash)
    }

    /// Drop the cached result for one path.
    pub fn invalidate(&self, path: &Path) {
        self.entries
            .lock()
            .expect("hash cache poisoned")
            .remove(path);
    }

    /// Drop every cached result.
    pub fn clear(&self) {
        self.entries.lock().expect("hash cache poisoned").clear();
    }
}
