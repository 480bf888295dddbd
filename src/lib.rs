//! walk - Command-Memoizing Build Engine
//!
//! Runs shell commands only when they would change something. Each command
//! gets a walk file recording what it read and wrote (discovered with
//! strace or an `LD_PRELOAD` shim) together with a content hash per path;
//! while command text and every hash still match, the command is skipped.
//!
//! A build system is then just a list of [`engine::Engine::system`] calls,
//! optionally fed through the [`pool::Concurrent`] worker pool:
//!
//! ```no_run
//! use std::sync::Arc;
//! use walk::config::Config;
//! use walk::engine::{CommandRequest, Engine};
//! use walk::pool::Concurrent;
//!
//! let engine = Arc::new(Engine::new(&Config::default()));
//! let pool = Concurrent::new(Arc::clone(&engine), 3);
//! pool.system(CommandRequest::new("cc -c -o foo.o foo.c", "foo.o.walk"))?;
//! pool.system(CommandRequest::new("cc -c -o bar.o bar.c", "bar.o.walk"))?;
//! pool.join()?;
//! engine.system(&CommandRequest::new("cc -o app foo.o bar.o", "app.walk"))
//!     .expect("link step");
//! pool.end()?;
//! # Ok::<(), walk::pool::PoolError>(())
//! ```

pub mod access;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod pool;
pub mod selftest;
pub mod signal;
pub mod trace;
pub mod walkfile;
