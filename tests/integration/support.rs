//! Shared test support: a scripted tracer plugged into the engine's
//! tracer seam.
//!
//! The scripted tracer really runs each command through `sh -c` (so
//! outputs appear on disk and exit codes are real) but reports a
//! pre-registered event list instead of observing syscalls. That keeps
//! these tests independent of strace and a C compiler while still
//! exercising the whole run/skip/record pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use walk::access::{AccessKind, TraceEvent};
use walk::config::Config;
use walk::engine::Engine;
use walk::error::EngineError;
use walk::trace::{exit_code, TraceOutcome, Tracer};

/// Tracer that runs commands for real but reports scripted events.
#[derive(Default)]
pub struct ScriptedTracer {
    scripts: Mutex<HashMap<String, Vec<TraceEvent>>>,
    run_log: Mutex<Vec<String>>,
}

impl ScriptedTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the events to report for one command.
    pub fn script(&self, command: &str, events: Vec<TraceEvent>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), events);
    }

    /// Commands executed so far, in start order.
    pub fn run_log(&self) -> Vec<String> {
        self.run_log.lock().unwrap().clone()
    }

    /// How many commands actually executed.
    pub fn runs(&self) -> usize {
        self.run_log.lock().unwrap().len()
    }
}

/// Adapter handing a shared [`ScriptedTracer`] to the engine.
pub struct Shared(pub Arc<ScriptedTracer>);

impl Tracer for Shared {
    fn trace(&self, command: &str, _scratch: &Path) -> Result<TraceOutcome, EngineError> {
        self.0.run_log.lock().unwrap().push(command.to_string());
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|e| EngineError::TracerSpawn {
                tool: "sh".to_string(),
                source: e,
            })?;
        let events = self
            .0
            .scripts
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_default();
        let exit_code = exit_code(status).ok_or_else(|| EngineError::MissingExitStatus {
            command: command.to_string(),
        })?;
        Ok(TraceOutcome { exit_code, events })
    }
}

/// Engine wired to a scripted tracer.
pub fn engine_with(tracer: &Arc<ScriptedTracer>) -> Engine {
    Engine::with_tracer(&Config::default(), Box::new(Shared(Arc::clone(tracer))))
}

/// Scratch directory under the target dir (the default ignore set drops
/// the system temp dir, which is exactly where tempdirs would land).
pub fn scratch_dir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir_in(env!("CARGO_TARGET_TMPDIR")).unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

pub fn read_event(path: &Path) -> TraceEvent {
    TraceEvent::Open {
        pid: 1,
        path: path.to_path_buf(),
        kind: AccessKind::Read,
    }
}

pub fn write_event(path: &Path) -> TraceEvent {
    TraceEvent::Open {
        pid: 1,
        path: path.to_path_buf(),
        kind: AccessKind::Write,
    }
}

pub fn failed_read_event(path: &Path) -> TraceEvent {
    TraceEvent::Open {
        pid: 1,
        path: path.to_path_buf(),
        kind: AccessKind::FailedRead,
    }
}
