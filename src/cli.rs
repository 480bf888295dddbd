//! Command-line interface definitions, using the clap derive API.
//!
//! # Example
//!
//! ```bash
//! # Compile a.c only if something it depends on changed
//! walk a.o.walk cc -c -o a.o a.c
//!
//! # Force a re-run
//! walk -f 1 a.o.walk cc -c -o a.o a.c
//!
//! # Pretend a header changed
//! walk --new config.h a.o.walk cc -c -o a.o a.c
//!
//! # Use the preload backend instead of strace
//! walk -m preload a.o.walk cc -c -o a.o a.c
//! ```

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::engine::Force;
use crate::trace::Method;

/// Command-memoizing build engine.
///
/// Runs a shell command and records which files it read and wrote; on
/// later invocations with the same walk path, the command is skipped
/// unless its text or any recorded file changed.
#[derive(Debug, Parser)]
#[command(name = "walk", version, about, max_term_width = 100)]
pub struct Cli {
    /// Treat PATH as newly modified, forcing invalidation of any record
    /// that references it. May repeat.
    #[arg(long = "new", value_name = "PATH")]
    pub new: Vec<PathBuf>,

    /// Force mode: 0 never runs the command, 1 always runs it.
    #[arg(short = 'f', value_name = "0|1", value_parser = clap::value_parser!(u8).range(0..=1))]
    pub force: Option<u8>,

    /// Tracer backend override.
    #[arg(short = 'm', long = "method", value_enum, value_name = "METHOD")]
    pub method: Option<MethodArg>,

    /// Run embedded quick self-checks and exit.
    #[arg(long)]
    pub doctest: bool,

    /// Run the end-to-end self-tests and exit.
    #[arg(long)]
    pub test: bool,

    /// Self-test helper: read A, write B, rename B to C.
    #[arg(long = "test-abc", num_args = 3, value_names = ["A", "B", "C"])]
    pub test_abc: Option<Vec<PathBuf>>,

    /// Measure the time to parse one walk file.
    #[arg(long = "test-profile", value_name = "WALK")]
    pub test_profile: Option<PathBuf>,

    /// Recursively time parsing of every .walk file under ROOT.
    #[arg(long = "time-load-all", value_name = "ROOT")]
    pub time_load_all: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Where the command's record lives.
    #[arg(value_name = "WALK_PATH")]
    pub walk_path: Option<PathBuf>,

    /// The command to run, passed to `sh -c` joined by spaces.
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// The force mode the flags ask for.
    #[must_use]
    pub fn force_mode(&self) -> Force {
        match self.force {
            Some(0) => Force::Skip,
            Some(_) => Force::Run,
            None => Force::Auto,
        }
    }
}

/// CLI spelling of the tracer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    /// Syscall tracer (strace).
    Trace,
    /// LD_PRELOAD shim.
    Preload,
}

impl From<MethodArg> for Method {
    fn from(arg: MethodArg) -> Method {
        match arg {
            MethodArg::Trace => Method::Trace,
            MethodArg::Preload => Method::Preload,
        }
    }
}
