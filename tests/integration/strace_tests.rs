//! End-to-end runs through the real strace backend.
//!
//! These exercise the full pipeline with no scripting: spawn under
//! `strace -f`, parse its output, hash, record, skip. They are skipped
//! when strace is not installed (CI containers vary).

#![cfg(target_os = "linux")]

use std::fs;
use std::process::Command;

use walk::config::Config;
use walk::engine::{CommandRequest, Engine, RunOutcome};
use walk::walkfile::{LoadOutcome, WalkFile};

use super::support::scratch_dir;

fn strace_available() -> bool {
    Command::new("strace")
        .arg("-V")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn test_strace_records_reads_and_writes() {
    if !strace_available() {
        eprintln!("strace not installed, skipping");
        return;
    }
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let walk_path = root.join("b.walk");
    fs::write(&a, "traced\n").unwrap();

    let engine = Engine::new(&Config::default());
    let command = format!("cat {} > {}", a.display(), b.display());
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(fs::read_to_string(&b).unwrap(), "traced\n");

    let walk = match WalkFile::load(&walk_path).unwrap() {
        LoadOutcome::Loaded(walk) => walk,
        other => panic!("expected a complete record, got {other:?}"),
    };
    assert!(walk.accesses.get(&a).is_some_and(|(k, _)| !k.involves_write()));
    assert!(walk.accesses.get(&b).is_some_and(|(k, _)| k.involves_write()));

    // Nothing changed: the real backend must not run the command again.
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);
}

#[test]
fn test_strace_detects_input_edit() {
    if !strace_available() {
        eprintln!("strace not installed, skipping");
        return;
    }
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let walk_path = root.join("b.walk");
    fs::write(&a, "one\n").unwrap();

    let engine = Engine::new(&Config::default());
    let command = format!("cat {} > {}", a.display(), b.display());
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));

    fs::write(&a, "two\n").unwrap();
    engine.cache().clear();
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(fs::read_to_string(&b).unwrap(), "two\n");
}
