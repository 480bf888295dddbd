//! Bounded worker pool for running memoized commands concurrently.
//!
//! [`Concurrent`] owns a fixed set of worker threads fed from a bounded
//! channel, so submission applies backpressure and dequeue order equals
//! submission order. Failures (non-zero exits and engine errors) accumulate
//! and surface at the next [`join`](Concurrent::join) or
//! [`end`](Concurrent::end); one failed command does not stop the others.
//! Callers must not submit two commands that write the same file
//! concurrently; the pool provides no per-path exclusion.
//!
//! ```no_run
//! use std::sync::Arc;
//! use walk::config::Config;
//! use walk::engine::{CommandRequest, Engine};
//! use walk::pool::Concurrent;
//!
//! let engine = Arc::new(Engine::new(&Config::default()));
//! let pool = Concurrent::new(engine, 3);
//! pool.system(CommandRequest::new("cc -c -o foo.o foo.c", "foo.o.walk"))?;
//! pool.system(CommandRequest::new("cc -c -o bar.o bar.c", "bar.o.walk"))?;
//! pool.join()?;
//! pool.system(CommandRequest::new("cc -o app foo.o bar.o", "app.walk"))?;
//! pool.end()?;
//! # Ok::<(), walk::pool::PoolError>(())
//! ```

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::engine::{CommandRequest, Engine};
use crate::error::EngineError;

/// Why one scheduled command counts as failed.
#[derive(Debug)]
pub enum FailureKind {
    /// The command ran and exited non-zero (or died to a signal).
    Exit(i32),
    /// The engine could not run or record the command.
    Engine(EngineError),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Exit(code) => write!(f, "exited with status {code}"),
            FailureKind::Engine(e) => write!(f, "{e}"),
        }
    }
}

/// One failed command, tagged with what was scheduled.
#[derive(Debug)]
pub struct CommandFailure {
    /// The scheduled command text.
    pub command: String,
    /// Its walk path.
    pub walk_path: PathBuf,
    /// What went wrong.
    pub kind: FailureKind,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.command, self.kind)
    }
}

/// Aggregate of every failure since the last barrier.
#[derive(Debug, thiserror::Error)]
#[error("{n} scheduled command(s) failed", n = .failures.len())]
pub struct PoolError {
    /// The individual failures, in completion order.
    pub failures: Vec<CommandFailure>,
}

#[derive(Default)]
struct PoolState {
    pending: Mutex<usize>,
    done: Condvar,
    failures: Mutex<Vec<CommandFailure>>,
    shutdown: Mutex<Option<Arc<AtomicBool>>>,
}

impl PoolState {
    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .lock()
            .expect("pool shutdown flag poisoned")
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn record(&self, failure: CommandFailure) {
        self.failures
            .lock()
            .expect("pool failures poisoned")
            .push(failure);
    }

    fn finish_one(&self) {
        let mut pending = self.pending.lock().expect("pool pending count poisoned");
        *pending -= 1;
        if *pending == 0 {
            self.done.notify_all();
        }
    }

    fn has_failures(&self) -> bool {
        !self.failures.lock().expect("pool failures poisoned").is_empty()
    }

    fn take_failures(&self) -> Vec<CommandFailure> {
        std::mem::take(&mut *self.failures.lock().expect("pool failures poisoned"))
    }
}

/// Worker pool running [`Engine::system`] on internal threads.
pub struct Concurrent {
    engine: Arc<Engine>,
    sender: Option<Sender<CommandRequest>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
    keep_going: bool,
}

impl Concurrent {
    /// Create a pool of `num_threads` workers.
    ///
    /// With `num_threads == 0` there are no workers and
    /// [`system`](Self::system) runs each command synchronously in the
    /// caller, still feeding the same failure aggregate.
    #[must_use]
    pub fn new(engine: Arc<Engine>, num_threads: usize) -> Self {
        let state = Arc::new(PoolState::default());
        if num_threads == 0 {
            return Self {
                engine,
                sender: None,
                workers: Vec::new(),
                state,
                keep_going: false,
            };
        }
        // Capacity 1: submission blocks until a worker is close to free,
        // so the caller cannot race far ahead of the build.
        let (sender, receiver) = crossbeam_channel::bounded::<CommandRequest>(1);
        let workers = (0..num_threads)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let state = Arc::clone(&state);
                let receiver: Receiver<CommandRequest> = receiver.clone();
                std::thread::spawn(move || {
                    while let Ok(req) = receiver.recv() {
                        if !state.shutdown_requested() {
                            run_one(&engine, &state, &req);
                        }
                        state.finish_one();
                    }
                })
            })
            .collect();
        Self {
            engine,
            sender: Some(sender),
            workers,
            state,
            keep_going: false,
        }
    }

    /// Create a pool sized from configuration.
    ///
    /// Uses `num_threads` from the config file when set, otherwise one
    /// worker per available CPU.
    #[must_use]
    pub fn from_config(engine: Arc<Engine>, config: &Config) -> Self {
        let num_threads = config.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });
        Self::new(engine, num_threads)
    }

    /// The worker count this pool was built with.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Keep scheduling new commands after a failure instead of rejecting
    /// them at the next [`system`](Self::system) call.
    #[must_use]
    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Stop workers from starting queued commands once `flag` is set.
    /// In-flight commands finish; the pool stays joinable.
    #[must_use]
    pub fn with_shutdown_flag(self, flag: Arc<AtomicBool>) -> Self {
        *self
            .state
            .shutdown
            .lock()
            .expect("pool shutdown flag poisoned") = Some(flag);
        self
    }

    /// Schedule one command.
    ///
    /// Blocks while the queue is full. Unless the pool was built with
    /// `keep_going`, an earlier failure is raised here instead of
    /// scheduling more work.
    pub fn system(&self, req: CommandRequest) -> Result<(), PoolError> {
        if !self.keep_going && self.state.has_failures() {
            return Err(PoolError {
                failures: self.state.take_failures(),
            });
        }
        match &self.sender {
            Some(sender) => {
                *self.state.pending.lock().expect("pool pending count poisoned") += 1;
                sender
                    .send(req)
                    .expect("pool workers exited while the pool was alive");
            }
            // Width zero: run in the caller.
            None => run_one(&self.engine, &self.state, &req),
        }
        Ok(())
    }

    /// Block until every previously scheduled command completed.
    ///
    /// Raises the accumulated failures (unless `keep_going`); the pool
    /// accepts further submissions afterwards.
    pub fn join(&self) -> Result<(), PoolError> {
        let mut pending = self.state.pending.lock().expect("pool pending count poisoned");
        while *pending > 0 {
            pending = self
                .state
                .done
                .wait(pending)
                .expect("pool pending count poisoned");
        }
        drop(pending);
        self.raise()
    }

    /// Failures recorded so far, removed from the aggregate.
    #[must_use]
    pub fn take_failures(&self) -> Vec<CommandFailure> {
        self.state.take_failures()
    }

    /// Permanent shutdown: drain in-flight work, stop the workers, and
    /// raise any accumulated failures.
    pub fn end(mut self) -> Result<(), PoolError> {
        self.shutdown();
        self.raise()
    }

    fn raise(&self) -> Result<(), PoolError> {
        if self.keep_going {
            return Ok(());
        }
        let failures = self.state.take_failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError { failures })
        }
    }

    fn shutdown(&mut self) {
        // Closing the channel lets workers drain the queue and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("a pool worker panicked");
            }
        }
    }
}

impl Drop for Concurrent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Concurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Concurrent")
            .field("num_threads", &self.workers.len())
            .field("keep_going", &self.keep_going)
            .finish_non_exhaustive()
    }
}

fn run_one(engine: &Engine, state: &PoolState, req: &CommandRequest) {
    match engine.system(req) {
        Ok(outcome) if outcome.success() => {}
        Ok(outcome) => state.record(CommandFailure {
            command: req.command.clone(),
            walk_path: req.walk_path.clone(),
            kind: FailureKind::Exit(outcome.code()),
        }),
        Err(e) => state.record(CommandFailure {
            command: req.command.clone(),
            walk_path: req.walk_path.clone(),
            kind: FailureKind::Engine(e),
        }),
    }
}
