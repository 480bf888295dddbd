//! Embedded self-tests and walk-file timing tools.
//!
//! `--doctest` exercises the pure pieces (codec, merge table) with no
//! subprocesses. `--test` drives a real scratch build through the engine
//! with the selected tracer backend, so it needs that backend's tool
//! (strace or a C compiler) installed; it is the quickest way to check a
//! new machine. `--test-profile` and `--time-load-all` measure the parse
//! path, which runs on every invocation of every command and is the part
//! worth keeping fast.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::access::AccessKind;
use crate::engine::{CommandRequest, Engine, RunOutcome};
use crate::hasher::ContentHash;
use crate::walkfile::{LoadOutcome, WalkFile};

/// Quick self-checks of the pure machinery.
pub fn doctest() -> Result<()> {
    // Codec round trip, including an awkward command.
    let mut walk = WalkFile::new(
        "sh -c 'echo one\necho two'".to_string(),
        Utc::now(),
        Duration::from_micros(1234),
    );
    walk.insert(
        PathBuf::from("/tmp/doctest input"),
        AccessKind::Read,
        ContentHash::Digest([5u8; 16]),
    );
    walk.insert(
        PathBuf::from("/tmp/doctest.h"),
        AccessKind::FailedRead,
        ContentHash::Absent,
    );
    let parsed = WalkFile::parse(&walk.serialize()).map_err(|e| anyhow::anyhow!(e))?;
    if parsed != walk {
        bail!("walk file round trip mismatch");
    }

    // Merge table spot checks.
    if AccessKind::Read.merge(AccessKind::Write) != AccessKind::ReadWrite {
        bail!("read+write must merge to read-write");
    }
    if AccessKind::FailedRead.merge(AccessKind::Read) != AccessKind::Read {
        bail!("a successful read must dominate a failed one");
    }

    // The absent sentinel must survive hex.
    if ContentHash::from_hex(&ContentHash::Absent.to_hex()) != Some(ContentHash::Absent) {
        bail!("absent hash must round trip");
    }

    println!("doctest passed");
    Ok(())
}

/// End-to-end self-tests against a real tracer backend.
///
/// The scratch tree lives under the current directory, not the system
/// temp dir: the default ignore set drops temp-dir accesses, and the
/// whole point here is to see them recorded.
pub fn run_tests(engine: &Engine) -> Result<()> {
    let dir = std::env::current_dir()?.join(format!("walk-selftest-{}", std::process::id()));
    fs::create_dir_all(&dir)?;
    // Records hold canonical paths; compare against the same form.
    let dir = dir.canonicalize()?;
    let result = run_tests_in(engine, &dir);
    let _ = fs::remove_dir_all(&dir);
    result?;
    println!("self-tests passed");
    Ok(())
}

fn run_tests_in(engine: &Engine, dir: &Path) -> Result<()> {
    let input = dir.join("input.txt");
    let output = dir.join("output.txt");
    let walk_path = dir.join("copy.walk");
    fs::write(&input, "first\n")?;

    let command = format!("cat {} > {}", input.display(), output.display());
    let req = CommandRequest::new(command, &walk_path);

    log::info!("self-test: initial run");
    let outcome = engine.system(&req).context("initial run")?;
    if outcome != RunOutcome::Ran(0) {
        bail!("expected the first run to execute, got {outcome:?}");
    }
    if fs::read_to_string(&output)? != "first\n" {
        bail!("command did not produce its output");
    }
    match WalkFile::load(&walk_path).context("loading record")? {
        LoadOutcome::Loaded(walk) => {
            if !walk.accesses.contains_key(&input) {
                bail!("record is missing the input file");
            }
            if !walk.accesses.contains_key(&output) {
                bail!("record is missing the output file");
            }
        }
        other => bail!("record not written: {other:?}"),
    }

    log::info!("self-test: unchanged re-run must skip");
    let outcome = engine.system(&req).context("second run")?;
    if outcome != RunOutcome::Skipped {
        bail!("expected the unchanged re-run to skip, got {outcome:?}");
    }

    log::info!("self-test: edited input must re-run");
    engine.cache().clear();
    fs::write(&input, "second\n")?;
    let outcome = engine.system(&req).context("run after edit")?;
    if outcome != RunOutcome::Ran(0) {
        bail!("expected the edited input to force a run, got {outcome:?}");
    }
    if fs::read_to_string(&output)? != "second\n" {
        bail!("re-run did not refresh the output");
    }

    // A command that reads a, writes b, renames b to c must be recorded
    // as reading a and writing c, and must re-run when a changes.
    log::info!("self-test: rename folding");
    let a = dir.join("abc_a");
    let b = dir.join("abc_b");
    let c = dir.join("abc_c");
    let abc_walk = dir.join("abc.walk");
    fs::write(&a, "x")?;
    let exe = std::env::current_exe().context("locating own executable")?;
    let command = format!(
        "{} --test-abc {} {} {}",
        exe.display(),
        a.display(),
        b.display(),
        c.display()
    );
    let req = CommandRequest::new(command, &abc_walk);

    let outcome = engine.system(&req).context("abc first run")?;
    if outcome != RunOutcome::Ran(0) {
        bail!("expected the abc command to execute, got {outcome:?}");
    }
    match WalkFile::load(&abc_walk).context("loading abc record")? {
        LoadOutcome::Loaded(walk) => {
            match walk.accesses.get(&c) {
                Some((kind, _)) if kind.involves_write() => {}
                other => bail!("rename target not recorded as written: {other:?}"),
            }
            if walk.accesses.contains_key(&b) {
                bail!("rename source leaked into the record");
            }
        }
        other => bail!("abc record not written: {other:?}"),
    }

    let outcome = engine.system(&req).context("abc second run")?;
    if outcome != RunOutcome::Skipped {
        bail!("expected the unchanged abc run to skip, got {outcome:?}");
    }

    engine.cache().clear();
    fs::write(&a, "y")?;
    let outcome = engine.system(&req).context("abc run after edit")?;
    if outcome != RunOutcome::Ran(0) {
        bail!("expected the edited abc input to force a run, got {outcome:?}");
    }

    Ok(())
}

/// `--test-abc` helper: read `a`, write `b`, rename `b` to `c`.
///
/// Exists so the self-tests have a child command with a known
/// read/write/rename footprint.
pub fn test_abc(a: &Path, b: &Path, c: &Path) -> Result<()> {
    let content = fs::read(a).with_context(|| format!("reading {}", a.display()))?;
    fs::write(b, content).with_context(|| format!("writing {}", b.display()))?;
    fs::rename(b, c).with_context(|| format!("renaming to {}", c.display()))?;
    Ok(())
}

/// Time parsing of one walk file for about two seconds.
pub fn profile_walk(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    WalkFile::parse(&text).map_err(|e| anyhow::anyhow!("not a walk file: {e}"))?;

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut iterations = 0u64;
    let start = Instant::now();
    while Instant::now() < deadline {
        let _ = WalkFile::parse(&text);
        iterations += 1;
    }
    let per_iteration = start.elapsed().as_secs_f64() / iterations as f64;
    println!("{}: {per_iteration:.9} sec/parse over {iterations} iterations", path.display());
    Ok(())
}

/// Recursively parse every `.walk` file under `root`, timing the lot.
pub fn time_load_all(root: &Path) -> Result<()> {
    let mut count = 0u64;
    let mut failures = 0u64;
    let start = Instant::now();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().map_or(true, |e| e != "walk") {
            continue;
        }
        match WalkFile::load(entry.path()) {
            Ok(LoadOutcome::Loaded(_)) => count += 1,
            Ok(_) => {
                log::debug!("skipping incomplete record {}", entry.path().display());
                failures += 1;
            }
            Err(e) => {
                log::warn!("{e}");
                failures += 1;
            }
        }
    }
    let elapsed = start.elapsed();
    println!(
        "parsed {count} walk file(s) in {:.6}s ({failures} unreadable)",
        elapsed.as_secs_f64()
    );
    Ok(())
}
