//! Preload backend: an `LD_PRELOAD` shim interposing the libc file calls.
//!
//! The shim source is embedded in the binary and compiled on demand with
//! the system C compiler. The artifact lands in the per-user cache
//! directory, named by a hash of the source, so a rebuilt engine with a
//! changed shim never picks up a stale library and concurrent engines
//! share one artifact. The build runs at most once per engine value, under
//! a mutex.
//!
//! The child inherits `LD_PRELOAD` and `WALK_TRACE_LOG` through its whole
//! descendant tree, including across re-exec. The shim resolves relative
//! paths itself, so the record log needs no per-pid working-directory
//! state. Limitation: a program that issues kernel-level opens without
//! going through libc (some linkers do) is invisible to this backend; use
//! the syscall tracer for those.

use directories::ProjectDirs;
use md5::{Digest, Md5};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use super::{exit_code, TraceOutcome, Tracer};
use crate::access::{AccessKind, TraceEvent};
use crate::error::EngineError;

/// C source of the interposer library, embedded at build time.
const SHIM_SOURCE: &str = include_str!("walk_shim.c");

/// Pid attached to shim events; the shim pre-resolves paths so the
/// access-log builder never consults per-pid state for them.
const SHIM_PID: u32 = 0;

/// Backend that observes commands through an `LD_PRELOAD` shim.
#[derive(Debug, Default)]
pub struct PreloadTracer {
    shim: Mutex<Option<PathBuf>>,
}

impl PreloadTracer {
    /// Create the backend; the shim builds lazily on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shim library path, building it if this engine has not
    /// done so yet.
    fn ensure_shim(&self) -> Result<PathBuf, EngineError> {
        let mut guard = self.shim.lock().expect("shim mutex poisoned");
        if let Some(path) = guard.as_ref() {
            return Ok(path.clone());
        }
        let path = build_shim()?;
        *guard = Some(path.clone());
        Ok(path)
    }
}

/// Directory for the compiled shim artifact.
fn shim_dir() -> PathBuf {
    ProjectDirs::from("com", "walk", "walk")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
}

/// Compile the embedded shim source, reusing an existing artifact.
fn build_shim() -> Result<PathBuf, EngineError> {
    let digest = Md5::digest(SHIM_SOURCE.as_bytes());
    let tag: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    let dir = shim_dir();
    fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
    let lib = dir.join(format!("walk-shim-{tag}.so"));
    if lib.exists() {
        return Ok(lib);
    }

    let source = dir.join(format!("walk-shim-{tag}.c"));
    fs::write(&source, SHIM_SOURCE).map_err(|e| EngineError::io(&source, e))?;

    // Build to a unique temp name and rename, so racing engines cannot
    // observe a half-written library.
    let staging = dir.join(format!("walk-shim-{tag}-{}.so", std::process::id()));
    let output = Command::new("cc")
        .arg("-shared")
        .arg("-fPIC")
        .arg("-O2")
        .arg("-o")
        .arg(&staging)
        .arg(&source)
        .arg("-ldl")
        .output()
        .map_err(|e| EngineError::TracerSpawn {
            tool: "cc".to_string(),
            source: e,
        })?;
    if !output.status.success() {
        return Err(EngineError::ShimBuild {
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    fs::rename(&staging, &lib).map_err(|e| EngineError::io(&lib, e))?;
    log::debug!("built preload shim at {}", lib.display());
    Ok(lib)
}

/// Parse one shim record line.
pub(crate) fn parse_line(line: &str) -> Option<TraceEvent> {
    match line.split_once(' ')? {
        ("o", rest) => {
            let (ret, rest) = rest.split_once(' ')?;
            let (flags, path) = rest.split_once(' ')?;
            let ok = ret == "0";
            let rd = flags.starts_with('r');
            let wr = flags.ends_with('w');
            let kind = if ok {
                if rd && wr {
                    AccessKind::ReadWrite
                } else if wr {
                    AccessKind::Write
                } else {
                    AccessKind::Read
                }
            } else if wr {
                return None;
            } else {
                AccessKind::FailedRead
            };
            Some(TraceEvent::Open {
                pid: SHIM_PID,
                path: PathBuf::from(path),
                kind,
            })
        }
        ("m", rest) => {
            let (from, to) = rest.split_once('\t')?;
            Some(TraceEvent::Rename {
                pid: SHIM_PID,
                from: PathBuf::from(from),
                to: PathBuf::from(to),
            })
        }
        ("u", path) => Some(TraceEvent::Unlink {
            pid: SHIM_PID,
            path: PathBuf::from(path),
        }),
        _ => None,
    }
}

impl Tracer for PreloadTracer {
    fn trace(&self, command: &str, scratch: &Path) -> Result<TraceOutcome, EngineError> {
        let shim = self.ensure_shim()?;
        let _ = fs::remove_file(scratch);

        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("LD_PRELOAD", &shim)
            .env("WALK_TRACE_LOG", scratch)
            .status()
            .map_err(|e| EngineError::TracerSpawn {
                tool: "sh".to_string(),
                source: e,
            })?;

        // A command that touched nothing leaves no log behind.
        let text = match fs::read_to_string(scratch) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(EngineError::TracerParse {
                    path: scratch.to_path_buf(),
                    detail: format!("cannot read shim log: {e}"),
                })
            }
        };
        let events = text.lines().filter_map(parse_line).collect();
        let _ = fs::remove_file(scratch);

        let exit_code = exit_code(status).ok_or_else(|| EngineError::MissingExitStatus {
            command: command.to_string(),
        })?;
        Ok(TraceOutcome { exit_code, events })
    }
}
