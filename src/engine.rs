//! The command runner: decide run-or-skip, execute under a tracer, record.
//!
//! [`Engine`] is the shared context one build session threads through every
//! command: the per-run hash cache, the ignore set, the tracer backends
//! (with the preload shim's lazy build), and the set of paths forced new
//! via `--new`. [`Engine::system`] implements the memoization protocol:
//!
//! 1. Load the prior walk file; missing, zero-length, or corrupt means run.
//! 2. Run if the command text changed (custom comparator honored).
//! 3. Run if any recorded path's current hash differs from the recorded
//!    one, or a previously failed read now exists.
//! 4. Otherwise skip.
//!
//! When running: truncate the walk file to zero (crash sentinel), execute
//! under the tracer, re-hash everything the command touched, and replace
//! the walk file atomically. The record is written even when the command
//! fails so the next invocation still knows what to invalidate.

use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::access::{AccessKind, AccessLogBuilder, IgnoreSet, resolve_path};
use crate::config::Config;
use crate::error::EngineError;
use crate::hasher::{ContentHash, HashCache};
use crate::trace::{Method, PreloadTracer, StraceTracer, Tracer};
use crate::walkfile::{LoadOutcome, WalkFile};

/// Shared function type for custom command comparators.
///
/// Returns true when the two command texts should be treated as equal,
/// e.g. a comparator that strips `-W*` flags before comparing so warning
/// tweaks do not force recompilation. Must be pure.
pub type CommandCompare = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Whether to consult the record at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Force {
    /// Run only when the record says the command would change something.
    #[default]
    Auto,
    /// Never run; report success as if skipped.
    Skip,
    /// Always run, regardless of the record.
    Run,
}

/// One command to memoize: what to run and where its record lives.
#[derive(Clone)]
pub struct CommandRequest {
    /// Shell command text, passed to `sh -c` verbatim.
    pub command: String,
    /// Location of the walk file for this command.
    pub walk_path: PathBuf,
    /// Run/skip override.
    pub force: Force,
    /// Tracer backend override for this request.
    pub method: Option<Method>,
    /// Custom command-text comparator.
    pub compare: Option<CommandCompare>,
    /// Human-readable tag used in diagnostics.
    pub description: Option<String>,
}

impl CommandRequest {
    /// Create a request with default options.
    #[must_use]
    pub fn new(command: impl Into<String>, walk_path: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            walk_path: walk_path.into(),
            force: Force::Auto,
            method: None,
            compare: None,
            description: None,
        }
    }

    /// Set the run/skip override.
    #[must_use]
    pub fn with_force(mut self, force: Force) -> Self {
        self.force = force;
        self
    }

    /// Set the tracer backend for this request.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set a custom command-text comparator.
    #[must_use]
    pub fn with_compare(mut self, compare: CommandCompare) -> Self {
        self.compare = Some(compare);
        self
    }

    /// Set the diagnostic description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRequest")
            .field("command", &self.command)
            .field("walk_path", &self.walk_path)
            .field("force", &self.force)
            .field("method", &self.method)
            .field("compare", &self.compare.is_some())
            .field("description", &self.description)
            .finish()
    }
}

/// What `system` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The record was valid; the command did not run.
    Skipped,
    /// The command ran and exited with this code (128 + signal for signal
    /// deaths).
    Ran(i32),
}

impl RunOutcome {
    /// Exit code to report: 0 for a skip, the child's code otherwise.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            RunOutcome::Skipped => 0,
            RunOutcome::Ran(code) => code,
        }
    }

    /// Whether the outcome counts as success.
    #[must_use]
    pub fn success(self) -> bool {
        self.code() == 0
    }

    /// Whether the command actually executed.
    #[must_use]
    pub fn executed(self) -> bool {
        matches!(self, RunOutcome::Ran(_))
    }
}

/// Shared context for one build session.
pub struct Engine {
    cache: HashCache,
    ignore: IgnoreSet,
    default_method: Method,
    strace: StraceTracer,
    preload: PreloadTracer,
    override_tracer: Option<Box<dyn Tracer>>,
    forced_new: Mutex<HashSet<PathBuf>>,
}

impl Engine {
    /// Create an engine from configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            cache: HashCache::new(),
            ignore: IgnoreSet::standard().with_extra(&config.ignore_roots),
            default_method: config.method.unwrap_or_else(Method::os_default),
            strace: StraceTracer::new(),
            preload: PreloadTracer::new(),
            override_tracer: None,
            forced_new: Mutex::new(HashSet::new()),
        }
    }

    /// Create an engine that routes every request through `tracer`,
    /// ignoring method selection. The seam for tests and embedders with
    /// their own observation mechanism.
    #[must_use]
    pub fn with_tracer(config: &Config, tracer: Box<dyn Tracer>) -> Self {
        let mut engine = Self::new(config);
        engine.override_tracer = Some(tracer);
        engine
    }

    /// Treat `path` as newly modified: any record referencing it fails
    /// validation until the referencing command has re-run.
    pub fn mark_new(&self, path: &Path) {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let resolved = resolve_path(&cwd, path);
        self.forced_new
            .lock()
            .expect("forced-new set poisoned")
            .insert(resolved);
    }

    /// The per-run hash cache.
    #[must_use]
    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    fn tracer_for(&self, method: Option<Method>) -> &dyn Tracer {
        if let Some(tracer) = self.override_tracer.as_deref() {
            return tracer;
        }
        match method.unwrap_or(self.default_method) {
            Method::Trace => &self.strace,
            Method::Preload => &self.preload,
        }
    }

    /// Run `req.command` unless its record shows nothing would change.
    ///
    /// Returns the command's exit status as a value; engine-internal
    /// failures (tracer, walk-file I/O) are errors.
    pub fn system(&self, req: &CommandRequest) -> Result<RunOutcome, EngineError> {
        match req.force {
            Force::Skip => {
                log::debug!("not running (forced off): {}", req.label());
                return Ok(RunOutcome::Skipped);
            }
            Force::Run => {
                log::debug!("running (forced): {}", req.label());
            }
            Force::Auto => match self.check(req)? {
                Some(reason) => log::info!("running because {}: {}", reason, req.label()),
                None => {
                    log::debug!("up to date: {}", req.label());
                    return Ok(RunOutcome::Skipped);
                }
            },
        }
        self.run(req)
    }

    /// Decide whether the prior record still validates.
    ///
    /// Returns `Some(reason)` when the command must run.
    fn check(&self, req: &CommandRequest) -> Result<Option<String>, EngineError> {
        let prior = match WalkFile::load(&req.walk_path)? {
            LoadOutcome::Missing => return Ok(Some("no record of a previous run".to_string())),
            LoadOutcome::Interrupted => {
                return Ok(Some("the previous run was interrupted".to_string()))
            }
            LoadOutcome::Invalid(detail) => {
                log::debug!("ignoring invalid record {}: {detail}", req.walk_path.display());
                return Ok(Some("the previous record is unreadable".to_string()));
            }
            LoadOutcome::Loaded(walk) => walk,
        };

        let same_command = match &req.compare {
            Some(compare) => compare(&prior.command, &req.command),
            None => prior.command == req.command,
        };
        if !same_command {
            return Ok(Some("the command has changed".to_string()));
        }

        for (path, (kind, recorded)) in &prior.accesses {
            if self
                .forced_new
                .lock()
                .expect("forced-new set poisoned")
                .contains(path)
            {
                return Ok(Some(format!("{} is marked new", path.display())));
            }
            let current = self.cache.hash(path)?;
            match kind {
                AccessKind::FailedRead => {
                    if !current.is_absent() {
                        return Ok(Some(format!("{} now exists", path.display())));
                    }
                }
                _ => {
                    if current != *recorded {
                        return Ok(Some(format!("{} has changed", path.display())));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Execute the command under its tracer and rewrite the record.
    fn run(&self, req: &CommandRequest) -> Result<RunOutcome, EngineError> {
        // Crash sentinel: a zero-length walk file means "interrupted" to
        // the next invocation, whatever happens below.
        WalkFile::truncate(&req.walk_path)?;

        let scratch = scratch_path(&req.walk_path);
        let started = Utc::now();
        let clock = Instant::now();

        let outcome = self
            .tracer_for(req.method)
            .trace(&req.command, &scratch)?;

        let duration = clock.elapsed();

        let mut builder = AccessLogBuilder::new(
            self.ignore.clone(),
            vec![req.walk_path.clone(), scratch.clone()],
        );
        for event in outcome.events {
            builder.push(event);
        }
        let accesses = builder.finish();

        let mut forced_new = self.forced_new.lock().expect("forced-new set poisoned");
        let mut walk = WalkFile::new(req.command.clone(), started, duration);
        for (path, kind) in &accesses {
            // The command may have rewritten anything it touched; drop any
            // cached hash before capturing the end-of-run state. Re-running
            // also clears a --new mark on the path.
            self.cache.invalidate(path);
            forced_new.remove(path);
            let hash = if *kind == AccessKind::FailedRead {
                ContentHash::Absent
            } else {
                self.cache.hash(path)?
            };
            walk.insert(path.clone(), *kind, hash);
        }
        drop(forced_new);

        walk.store(&req.walk_path)?;

        if outcome.exit_code != 0 {
            log::warn!("command failed with status {}: {}", outcome.exit_code, req.label());
        }
        Ok(RunOutcome::Ran(outcome.exit_code))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("default_method", &self.default_method)
            .field("override_tracer", &self.override_tracer.is_some())
            .finish_non_exhaustive()
    }
}

/// Sibling path the tracer backends use for their intermediate output.
fn scratch_path(walk_path: &Path) -> PathBuf {
    let mut name = walk_path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    name.push_str("-trace");
    walk_path.with_file_name(name)
}
