//! Tracer backends: observing the file accesses of a command.
//!
//! A [`Tracer`] runs one command and reports its exit status together with
//! every file-access event the command (and its descendants) performed. Two
//! interchangeable backends exist:
//!
//! - [`StraceTracer`]: runs the command under `strace -f` and parses the
//!   syscall log. The Linux default.
//! - [`PreloadTracer`]: injects a small `LD_PRELOAD` shim that interposes
//!   the libc open/rename/unlink family. The default elsewhere. Misses
//!   kernel-level opens that bypass libc (notably some linker paths).
//!
//! The trait is the seam tests hook into: a scripted tracer can run the
//! command and report a fixed event list without either tool installed.

pub mod preload;
pub mod strace;

pub use preload::PreloadTracer;
pub use strace::StraceTracer;

use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use crate::access::TraceEvent;
use crate::error::EngineError;

/// Which backend observes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Syscall tracer (`strace`).
    Trace,
    /// Dynamic-linker preload shim.
    Preload,
}

impl Method {
    /// Platform default when neither flag nor config chooses a backend.
    #[must_use]
    pub fn os_default() -> Method {
        if cfg!(target_os = "linux") {
            Method::Trace
        } else {
            Method::Preload
        }
    }
}

/// What a tracer observed for one command run.
#[derive(Debug)]
pub struct TraceOutcome {
    /// Exit code of the command, with signal deaths folded to 128 + signal.
    pub exit_code: i32,
    /// Raw access events, in observation order.
    pub events: Vec<TraceEvent>,
}

/// Capability to run a command and observe its file accesses.
pub trait Tracer: Send + Sync {
    /// Run `command` through `sh -c`, streaming its stdout/stderr to the
    /// caller's, and collect access events.
    ///
    /// `scratch` is a caller-provided path (a sibling of the walk file)
    /// the backend may use for its intermediate log; the backend removes
    /// it before returning.
    fn trace(&self, command: &str, scratch: &std::path::Path) -> Result<TraceOutcome, EngineError>;
}

/// Fold an [`ExitStatus`] into a single exit code, preserving signal
/// deaths as 128 + signal per shell convention.
///
/// Returns `None` for a status that neither exited nor died to a signal
/// (a stopped tracee, for instance); backends report that as
/// [`EngineError::MissingExitStatus`].
#[must_use]
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|s| 128 + s))
}
