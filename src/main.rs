//! Entry point for the `walk` CLI.
//!
//! Performs exactly one memoized command run per invocation. The process
//! exit status mirrors the command's (0 on a skip); engine-internal
//! failures exit 125 so build scripts can tell them apart from a failing
//! command.

use clap::Parser;
use std::sync::Arc;

use walk::cli::Cli;
use walk::config::Config;
use walk::engine::{CommandRequest, Engine};
use walk::error::{EXIT_CODE_ENGINE_ERROR, EXIT_CODE_INTERRUPTED};
use walk::trace::Method;
use walk::{logging, selftest, signal};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    // The helper and timing modes do one job and exit.
    if let Some(paths) = &cli.test_abc {
        return exit_code_of(selftest::test_abc(&paths[0], &paths[1], &paths[2]));
    }
    if cli.doctest {
        return exit_code_of(selftest::doctest());
    }
    if let Some(path) = &cli.test_profile {
        return exit_code_of(selftest::profile_walk(path));
    }
    if let Some(root) = &cli.time_load_all {
        return exit_code_of(selftest::time_load_all(root));
    }

    let mut config = Config::load();
    if let Some(method) = cli.method {
        config.method = Some(Method::from(method));
    }
    let engine = Arc::new(Engine::new(&config));
    for path in &cli.new {
        engine.mark_new(path);
    }

    if cli.test {
        return exit_code_of(selftest::run_tests(&engine));
    }

    let (Some(walk_path), false) = (cli.walk_path.clone(), cli.command.is_empty()) else {
        log::error!("usage: walk [FLAGS] <walk-path> <command>...");
        return 2;
    };

    let handler = signal::install_handler();

    let req = CommandRequest::new(cli.command.join(" "), walk_path).with_force(cli.force_mode());
    match engine.system(&req) {
        Ok(outcome) => {
            if handler.is_shutdown_requested() {
                EXIT_CODE_INTERRUPTED
            } else {
                outcome.code()
            }
        }
        Err(e) => {
            log::error!("{e}");
            EXIT_CODE_ENGINE_ERROR
        }
    }
}

fn exit_code_of(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{e:#}");
            EXIT_CODE_ENGINE_ERROR
        }
    }
}
