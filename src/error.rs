//! Engine error taxonomy and process exit codes.

use std::path::PathBuf;

/// Exit code reported when the engine itself fails (as opposed to the
/// command it ran). Chosen outside the 0..=124 range commands normally use
/// so callers can tell the two apart.
pub const EXIT_CODE_ENGINE_ERROR: i32 = 125;

/// Exit code for SIGINT (Ctrl+C) interruption, Unix convention 128 + 2.
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Errors internal to the engine.
///
/// A command exiting non-zero is *not* an `EngineError`; it is returned as a
/// value (see [`crate::engine::RunOutcome`]). These variants cover the cases
/// where the engine could not do its own job: reading or writing a walk
/// file, spawning a tracer, building the preload shim, or making sense of
/// tracer output.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An I/O error on a path the engine needed to read or write.
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The tracer tool (or the shell under it) could not be spawned.
    #[error("failed to spawn `{tool}`: {source}")]
    TracerSpawn {
        /// Name of the tool that failed to start.
        tool: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The tracer ran but its output could not be read or understood.
    #[error("failed to process tracer output {}: {detail}", .path.display())]
    TracerParse {
        /// Location of the tracer output that failed to parse.
        path: PathBuf,
        /// Description of the failure.
        detail: String,
    },

    /// The preload shim library could not be built.
    #[error("failed to build preload shim: {detail}")]
    ShimBuild {
        /// Description of the failure.
        detail: String,
    },

    /// The tracer returned without an exit status for the child.
    #[error("tracer reported no exit status for command: {command}")]
    MissingExitStatus {
        /// The command whose status is missing.
        command: String,
    },
}

impl EngineError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
