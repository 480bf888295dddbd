use std::fs;
use std::sync::Arc;

use walk::access::AccessKind;
use walk::engine::{CommandRequest, Force, RunOutcome};
use walk::hasher::ContentHash;
use walk::walkfile::{LoadOutcome, WalkFile};

use super::support::{
    engine_with, failed_read_event, read_event, scratch_dir, write_event, ScriptedTracer,
};

fn load(path: &std::path::Path) -> WalkFile {
    match WalkFile::load(path).unwrap() {
        LoadOutcome::Loaded(walk) => walk,
        other => panic!("expected a complete record, got {other:?}"),
    }
}

#[test]
fn test_first_run_executes_and_records() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let walk_path = root.join("b.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > {}", a.display(), b.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![read_event(&a), write_event(&b)]);
    let engine = engine_with(&tracer);

    let outcome = engine
        .system(&CommandRequest::new(&command, &walk_path))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Ran(0));
    assert_eq!(fs::read_to_string(&b).unwrap(), "one");

    let walk = load(&walk_path);
    assert_eq!(walk.command, command);
    assert_eq!(walk.accesses.get(&a).map(|(k, _)| *k), Some(AccessKind::Read));
    assert_eq!(walk.accesses.get(&b).map(|(k, _)| *k), Some(AccessKind::Write));
    // Recorded hashes are the end-of-run content.
    let (_, hash_a) = walk.accesses[&a];
    assert_eq!(hash_a, walk::hasher::hash_file(&a).unwrap());
}

#[test]
fn test_second_run_skips() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let walk_path = root.join("b.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > {}", a.display(), b.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![read_event(&a), write_event(&b)]);
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);
    assert_eq!(tracer.runs(), 1);
}

#[test]
fn test_input_change_forces_rerun() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let walk_path = root.join("b.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > {}", a.display(), b.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![read_event(&a), write_event(&b)]);
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));

    fs::write(&a, "two").unwrap();
    engine.cache().clear();
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(fs::read_to_string(&b).unwrap(), "two");
    assert_eq!(tracer.runs(), 2);
}

#[test]
fn test_deleted_output_forces_rerun() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let b = root.join("b.txt");
    let walk_path = root.join("b.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > {}", a.display(), b.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![read_event(&a), write_event(&b)]);
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));

    // Write-only paths participate in invalidation too.
    fs::remove_file(&b).unwrap();
    engine.cache().clear();
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert!(b.exists());
}

#[test]
fn test_command_text_change_forces_rerun() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let walk_path = root.join("a.walk");
    fs::write(&a, "one").unwrap();

    let first = format!("cat {} > /dev/null", a.display());
    let second = format!("cat  {} > /dev/null", a.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&first, vec![read_event(&a)]);
    tracer.script(&second, vec![read_event(&a)]);
    let engine = engine_with(&tracer);

    assert_eq!(
        engine.system(&CommandRequest::new(&first, &walk_path)).unwrap(),
        RunOutcome::Ran(0)
    );
    // One extra space is a different command.
    assert_eq!(
        engine.system(&CommandRequest::new(&second, &walk_path)).unwrap(),
        RunOutcome::Ran(0)
    );
    assert_eq!(tracer.runs(), 2);
}

#[test]
fn test_command_text_is_stored_verbatim() {
    let (_guard, root) = scratch_dir();
    let walk_path = root.join("v.walk");

    // Quoting and whitespace must not be normalized.
    let command = "echo  'spaced   out'   >/dev/null".to_string();
    let tracer = ScriptedTracer::new();
    let engine = engine_with(&tracer);

    engine.system(&CommandRequest::new(&command, &walk_path)).unwrap();
    assert_eq!(load(&walk_path).command, command);
}

#[test]
fn test_custom_comparator_suppresses_rerun() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let walk_path = root.join("a.walk");
    fs::write(&a, "one").unwrap();

    // The command text carries cc-style flags in a shell comment, so the
    // scripted tracer can still run it; the engine only compares text.
    let first = format!("true # cc -O0 -c {}", a.display());
    let second = format!("true # cc -O2 -c {}", a.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&first, vec![read_event(&a)]);
    tracer.script(&second, vec![read_event(&a)]);
    let engine = engine_with(&tracer);

    engine.system(&CommandRequest::new(&first, &walk_path)).unwrap();

    let ignore_opt_flags = Arc::new(|old: &str, new: &str| {
        let strip = |s: &str| {
            s.split_whitespace()
                .filter(|t| !t.starts_with("-O"))
                .collect::<Vec<_>>()
                .join(" ")
        };
        strip(old) == strip(new)
    });

    let req = CommandRequest::new(&second, &walk_path).with_compare(ignore_opt_flags);
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);

    // Without the comparator the same text change forces a run.
    let req = CommandRequest::new(&second, &walk_path);
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
}

#[test]
fn test_failed_read_materialization() {
    let (_guard, root) = scratch_dir();
    let maybe_h = root.join("maybe.h");
    let walk_path = root.join("probe.walk");

    let command = "true".to_string();
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![failed_read_event(&maybe_h)]);
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    let walk = load(&walk_path);
    assert_eq!(
        walk.accesses.get(&maybe_h),
        Some(&(AccessKind::FailedRead, ContentHash::Absent))
    );

    // The probed file still does not exist: skip.
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);

    // Once it appears, the probe must re-run.
    fs::write(&maybe_h, "#define MAYBE 1\n").unwrap();
    engine.cache().clear();
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(tracer.runs(), 2);
}

#[test]
fn test_interrupted_record_forces_rerun() {
    let (_guard, root) = scratch_dir();
    let walk_path = root.join("i.walk");

    let command = "true".to_string();
    let tracer = ScriptedTracer::new();
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);

    // Simulate a crash between the truncate and the final rename.
    WalkFile::truncate(&walk_path).unwrap();
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert!(fs::metadata(&walk_path).unwrap().len() > 0);
}

#[test]
fn test_invalid_record_forces_rerun() {
    let (_guard, root) = scratch_dir();
    let walk_path = root.join("g.walk");

    let command = "true".to_string();
    let tracer = ScriptedTracer::new();
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));

    fs::write(&walk_path, "garbage that is not a walk file\n").unwrap();
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
}

#[test]
fn test_record_written_even_when_command_fails() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let walk_path = root.join("f.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > /dev/null; exit 3", a.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![read_event(&a)]);
    let engine = engine_with(&tracer);

    let outcome = engine
        .system(&CommandRequest::new(&command, &walk_path))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Ran(3));

    // Callers need the record for the next invalidation even on failure.
    let walk = load(&walk_path);
    assert!(walk.accesses.contains_key(&a));
}

#[test]
fn test_force_modes() {
    let (_guard, root) = scratch_dir();
    let walk_path = root.join("force.walk");

    let command = "true".to_string();
    let tracer = ScriptedTracer::new();
    let engine = engine_with(&tracer);

    // Force off: success without running, and no record appears.
    let req = CommandRequest::new(&command, &walk_path).with_force(Force::Skip);
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);
    assert!(!walk_path.exists());
    assert_eq!(tracer.runs(), 0);

    // Normal run, then force on re-runs despite a valid record.
    let req = CommandRequest::new(&command, &walk_path);
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    let req = CommandRequest::new(&command, &walk_path).with_force(Force::Run);
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(tracer.runs(), 2);
}

#[test]
fn test_mark_new_forces_one_rerun() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let walk_path = root.join("n.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > /dev/null", a.display());
    let tracer = ScriptedTracer::new();
    tracer.script(&command, vec![read_event(&a)]);
    let engine = engine_with(&tracer);
    let req = CommandRequest::new(&command, &walk_path);

    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);

    engine.mark_new(&a);
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Ran(0));
    // Re-running recorded a fresh hash and cleared the mark.
    assert_eq!(engine.system(&req).unwrap(), RunOutcome::Skipped);
    assert_eq!(tracer.runs(), 2);
}

#[test]
fn test_walk_path_never_appears_in_its_own_record() {
    let (_guard, root) = scratch_dir();
    let a = root.join("a.txt");
    let walk_path = root.join("self.walk");
    fs::write(&a, "one").unwrap();

    let command = format!("cat {} > /dev/null", a.display());
    let tracer = ScriptedTracer::new();
    // A confused command that also touches its own walk file.
    tracer.script(&command, vec![read_event(&a), write_event(&walk_path)]);
    let engine = engine_with(&tracer);

    engine.system(&CommandRequest::new(&command, &walk_path)).unwrap();
    let walk = load(&walk_path);
    assert!(walk.accesses.contains_key(&a));
    assert!(!walk.accesses.contains_key(&walk_path));
}
