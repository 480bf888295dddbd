//! Syscall-tracer backend built on `strace`.
//!
//! The command runs under `strace -f -e trace=%file` with output written to
//! a scratch file, one line per syscall prefixed by the acting pid. The
//! parser extracts opens (with flags and return value), renames, unlinks,
//! and `chdir` so the access-log builder can resolve relative paths per
//! process. `strace` itself exits with the child's status, including
//! signal deaths, so the exit code passes straight through.
//!
//! `fchdir` takes a descriptor rather than a path and is invisible to the
//! `%file` class; a command using it may get relative paths resolved
//! against a stale directory.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{exit_code, TraceOutcome, Tracer};
use crate::access::{AccessKind, TraceEvent};
use crate::error::EngineError;

/// Backend that observes commands with `strace`.
#[derive(Debug)]
pub struct StraceTracer {
    open_re: Regex,
    openat_re: Regex,
    creat_re: Regex,
    rename_re: Regex,
    renameat_re: Regex,
    unlink_re: Regex,
    unlinkat_re: Regex,
    chdir_re: Regex,
}

impl StraceTracer {
    /// Compile the line patterns once.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open_re: Regex::new(r#"^(\d+)\s+open\("([^"]*)", ([^)]*)\)\s+= (-?\d+)"#)
                .expect("static regex"),
            openat_re: Regex::new(
                r#"^(\d+)\s+openat\([A-Z0-9_]+(?:<[^>]*>)?, "([^"]*)", ([^)]*)\)\s+= (-?\d+)"#,
            )
            .expect("static regex"),
            creat_re: Regex::new(r#"^(\d+)\s+creat\("([^"]*)", [^)]*\)\s+= (-?\d+)"#)
                .expect("static regex"),
            rename_re: Regex::new(r#"^(\d+)\s+rename\("([^"]*)", "([^"]*)"\)\s+= 0"#)
                .expect("static regex"),
            renameat_re: Regex::new(
                r#"^(\d+)\s+renameat2?\([^,]+, "([^"]*)", [^,]+, "([^"]*)"[^)]*\)\s+= 0"#,
            )
            .expect("static regex"),
            unlink_re: Regex::new(r#"^(\d+)\s+unlink\("([^"]*)"\)\s+= 0"#).expect("static regex"),
            unlinkat_re: Regex::new(r#"^(\d+)\s+unlinkat\([^,]+, "([^"]*)", [^)]*\)\s+= 0"#)
                .expect("static regex"),
            chdir_re: Regex::new(r#"^(\d+)\s+chdir\("([^"]*)"\)\s+= 0"#).expect("static regex"),
        }
    }

    /// Parse one strace output line into an event, if it is one we track.
    pub(crate) fn parse_line(&self, line: &str) -> Option<TraceEvent> {
        if let Some(c) = self.openat_re.captures(line).or_else(|| self.open_re.captures(line)) {
            let pid = c[1].parse().ok()?;
            let path = PathBuf::from(&c[2]);
            let flags = &c[3];
            let ret: i64 = c[4].parse().ok()?;
            return open_event(pid, path, flags.contains("O_RDWR"), flags.contains("O_WRONLY"), ret);
        }
        if let Some(c) = self.creat_re.captures(line) {
            let pid = c[1].parse().ok()?;
            let ret: i64 = c[3].parse().ok()?;
            // creat(2) is open with O_WRONLY|O_CREAT|O_TRUNC.
            return open_event(pid, PathBuf::from(&c[2]), false, true, ret);
        }
        if let Some(c) = self
            .rename_re
            .captures(line)
            .or_else(|| self.renameat_re.captures(line))
        {
            return Some(TraceEvent::Rename {
                pid: c[1].parse().ok()?,
                from: PathBuf::from(&c[2]),
                to: PathBuf::from(&c[3]),
            });
        }
        if let Some(c) = self
            .unlink_re
            .captures(line)
            .or_else(|| self.unlinkat_re.captures(line))
        {
            return Some(TraceEvent::Unlink {
                pid: c[1].parse().ok()?,
                path: PathBuf::from(&c[2]),
            });
        }
        if let Some(c) = self.chdir_re.captures(line) {
            return Some(TraceEvent::Chdir {
                pid: c[1].parse().ok()?,
                path: PathBuf::from(&c[2]),
            });
        }
        None
    }
}

impl Default for StraceTracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify an open by flags and return value.
fn open_event(pid: u32, path: PathBuf, rdwr: bool, wronly: bool, ret: i64) -> Option<TraceEvent> {
    let kind = if ret >= 0 {
        if rdwr {
            AccessKind::ReadWrite
        } else if wronly {
            AccessKind::Write
        } else {
            AccessKind::Read
        }
    } else if wronly {
        // A failed open for writing leaves nothing to track.
        return None;
    } else {
        AccessKind::FailedRead
    };
    Some(TraceEvent::Open { pid, path, kind })
}

impl Tracer for StraceTracer {
    fn trace(&self, command: &str, scratch: &Path) -> Result<TraceOutcome, EngineError> {
        let _ = fs::remove_file(scratch);

        let status = Command::new("strace")
            .arg("-f")
            .arg("-q")
            .arg("-qq")
            .arg("-e")
            .arg("trace=%file")
            .arg("-o")
            .arg(scratch)
            .arg("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|e| EngineError::TracerSpawn {
                tool: "strace".to_string(),
                source: e,
            })?;

        let text = fs::read_to_string(scratch).map_err(|e| EngineError::TracerParse {
            path: scratch.to_path_buf(),
            detail: format!("cannot read strace output: {e}"),
        })?;
        let events = text.lines().filter_map(|l| self.parse_line(l)).collect();
        let _ = fs::remove_file(scratch);

        let exit_code = exit_code(status).ok_or_else(|| EngineError::MissingExitStatus {
            command: command.to_string(),
        })?;
        Ok(TraceOutcome { exit_code, events })
    }
}
