//! Producer tests: directory watching, time segments and end-to-end pipelines over both.

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use shakeflow::pipeline::run_pipeline;
use shakeflow::source::ManualClock;
use shakeflow::{
    DirectoryUnitSource, DiscoveryMode, DispatchOpts, GatingPolicy, IntervalUnitSource,
    SourceError, UnitSource,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn touch(path: &Path) {
    fs::write(path, b"").unwrap();
}

fn t0() -> DateTime<Utc> {
    "2024-05-01T00:00:00Z".parse().unwrap()
}

fn fast(batch_size: usize, gating: GatingPolicy) -> DispatchOpts {
    DispatchOpts {
        poll_interval: Duration::from_millis(10),
        ..DispatchOpts::new(batch_size, gating)
    }
}

// --- directory source ---

#[test]
fn test_from_origin_seeds_matching_files_sorted() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("b.h5"));
    touch(&dir.path().join("a.h5"));
    touch(&dir.path().join("c.txt"));

    let source = DirectoryUnitSource::new(dir.path(), DiscoveryMode::FromOrigin, ".h5").unwrap();
    let root = dir.path().canonicalize().unwrap();
    assert_eq!(source.root(), root.as_path());
    assert_eq!(
        source.discovered().snapshot(),
        vec![root.join("a.h5"), root.join("b.h5")]
    );
}

#[test]
fn test_from_origin_walks_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("2024/05")).unwrap();
    touch(&dir.path().join("2024/05/day1.h5"));
    touch(&dir.path().join("top.h5"));

    let source = DirectoryUnitSource::new(dir.path(), DiscoveryMode::FromOrigin, ".h5").unwrap();
    let root = dir.path().canonicalize().unwrap();
    assert_eq!(
        source.discovered().snapshot(),
        vec![root.join("2024/05/day1.h5"), root.join("top.h5")]
    );
}

#[test]
fn test_from_now_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    touch(&dir.path().join("a.h5"));
    let source = DirectoryUnitSource::new(dir.path(), DiscoveryMode::FromNow, ".h5").unwrap();
    assert!(source.discovered().is_empty());
}

#[test]
fn test_rejects_missing_root_file_root_and_bad_mode() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing");
    assert!(matches!(
        DirectoryUnitSource::new(&missing, DiscoveryMode::FromOrigin, ".h5"),
        Err(SourceError::NotFound(p)) if p == missing
    ));

    let file = dir.path().join("plain.h5");
    touch(&file);
    assert!(matches!(
        DirectoryUnitSource::new(&file, DiscoveryMode::FromOrigin, ".h5"),
        Err(SourceError::InvalidArgument(_))
    ));

    assert!(matches!(
        DirectoryUnitSource::with_mode_str(dir.path(), "from_tomorrow", ".h5"),
        Err(SourceError::InvalidArgument(_))
    ));
}

#[test]
fn test_watch_discovers_new_matching_files_only() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut source = DirectoryUnitSource::new(&root, DiscoveryMode::FromNow, ".h5").unwrap();
    let discovered = source.discovered();
    source.start().unwrap();

    touch(&root.join("x.h5"));
    assert!(wait_until(WAIT, || discovered.contains(&root.join("x.h5"))));

    touch(&root.join("y.txt"));
    fs::create_dir(root.join("folder.h5")).unwrap();

    fs::create_dir(root.join("sub")).unwrap();
    touch(&root.join("sub/z.h5"));
    assert!(wait_until(WAIT, || discovered.contains(&root.join("sub/z.h5"))));

    let seen = discovered.snapshot();
    assert!(!seen.contains(&root.join("y.txt")));
    assert!(!seen.contains(&root.join("folder.h5")));
    assert_eq!(seen.len(), 2, "{seen:?}");

    source.stop();
    source.join().unwrap();
    touch(&root.join("late.h5"));
    thread::sleep(Duration::from_millis(200));
    assert!(!discovered.contains(&root.join("late.h5")));
}

#[test]
fn test_watch_does_not_duplicate_seeded_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    touch(&root.join("a.h5"));

    let mut source = DirectoryUnitSource::new(&root, DiscoveryMode::FromOrigin, ".h5").unwrap();
    let discovered = source.discovered();
    source.start().unwrap();
    touch(&root.join("b.h5"));
    assert!(wait_until(WAIT, || discovered.contains(&root.join("b.h5"))));
    assert_eq!(
        discovered.snapshot(),
        vec![root.join("a.h5"), root.join("b.h5")]
    );
}

#[test]
fn test_watch_finds_files_written_right_after_mkdir() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut source = DirectoryUnitSource::new(&root, DiscoveryMode::FromNow, ".h5").unwrap();
    let discovered = source.discovered();
    source.start().unwrap();

    let mut expected = Vec::new();
    for day in 0..20 {
        let hour_dir = root.join(format!("day{day:02}/12"));
        fs::create_dir_all(&hour_dir).unwrap();
        for n in 0..5 {
            let file = hour_dir.join(format!("{n}_EHZ.h5"));
            touch(&file);
            expected.push(file);
        }
    }

    assert!(
        wait_until(WAIT, || discovered.len() == expected.len()),
        "discovered {} of {}",
        discovered.len(),
        expected.len()
    );
    assert!(expected.iter().all(|f| discovered.contains(f)));
}

#[test]
fn test_watch_finds_files_in_moved_in_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("database");
    let staging = dir.path().join("staging");
    fs::create_dir(&root).unwrap();
    fs::create_dir_all(staging.join("2024/05")).unwrap();
    touch(&staging.join("2024/05/a.h5"));
    touch(&staging.join("2024/b.h5"));
    let root = root.canonicalize().unwrap();

    let mut source = DirectoryUnitSource::new(&root, DiscoveryMode::FromNow, ".h5").unwrap();
    let discovered = source.discovered();
    source.start().unwrap();

    fs::rename(staging.join("2024"), root.join("2024")).unwrap();
    assert!(wait_until(WAIT, || discovered.len() == 2));
    let mut seen = discovered.snapshot();
    seen.sort();
    assert_eq!(
        seen,
        vec![root.join("2024/05/a.h5"), root.join("2024/b.h5")]
    );
}

// --- interval source ---

#[test]
fn test_interval_emits_segment_once_complete() {
    let clock = Arc::new(ManualClock::new(t0()));
    let mut source = IntervalUnitSource::with_clock(
        t0(),
        TimeDelta::seconds(60),
        TimeDelta::zero(),
        Arc::clone(&clock),
    )
    .unwrap()
    .with_tick(Duration::from_millis(20));
    let discovered = source.discovered();
    assert_eq!(discovered.snapshot(), vec![t0()]);
    source.start().unwrap();

    // Exactly at the segment end is not yet due.
    clock.set(t0() + TimeDelta::seconds(60));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(discovered.len(), 1);

    clock.set(t0() + TimeDelta::seconds(60) + TimeDelta::milliseconds(1));
    assert!(wait_until(WAIT, || discovered.len() == 2));
    assert_eq!(
        discovered.snapshot(),
        vec![t0(), t0() + TimeDelta::seconds(60)]
    );

    source.stop();
    source.join().unwrap();
}

#[test]
fn test_interval_waits_for_lag() {
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(61)));
    let mut source = IntervalUnitSource::with_clock(
        t0(),
        TimeDelta::seconds(60),
        TimeDelta::seconds(3600),
        Arc::clone(&clock),
    )
    .unwrap()
    .with_tick(Duration::from_millis(20));
    let discovered = source.discovered();
    source.start().unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(discovered.len(), 1);

    clock.advance(TimeDelta::seconds(3600));
    assert!(wait_until(WAIT, || discovered.len() == 2));
}

#[test]
fn test_interval_stop_is_prompt_with_long_tick() {
    let clock = ManualClock::new(t0());
    let mut source =
        IntervalUnitSource::with_clock(t0(), TimeDelta::seconds(60), TimeDelta::zero(), clock)
            .unwrap()
            .with_tick(Duration::from_secs(10));
    source.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let began = Instant::now();
    source.stop();
    source.join().unwrap();
    assert!(began.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_interval_restart_does_not_reemit() {
    let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(121)));
    let mut source = IntervalUnitSource::with_clock(
        t0(),
        TimeDelta::seconds(60),
        TimeDelta::zero(),
        Arc::clone(&clock),
    )
    .unwrap()
    .with_tick(Duration::from_millis(20));
    let discovered = source.discovered();

    source.start().unwrap();
    assert!(wait_until(WAIT, || discovered.len() == 3));
    source.stop();
    source.join().unwrap();

    clock.advance(TimeDelta::seconds(60));
    source.start().unwrap();
    assert!(wait_until(WAIT, || discovered.len() == 4));
    assert_eq!(
        discovered.snapshot().last(),
        Some(&(t0() + TimeDelta::seconds(180)))
    );
}

// --- end to end ---

#[test]
fn test_pipeline_over_interval_backlog() {
    let clock = ManualClock::new(t0() + TimeDelta::seconds(3 * 600 + 1));
    let source =
        IntervalUnitSource::with_clock(t0(), TimeDelta::seconds(600), TimeDelta::zero(), clock)
            .unwrap()
            .with_tick(Duration::from_millis(10));
    let cancel = AtomicBool::new(false);

    let mut batches: Vec<Vec<DateTime<Utc>>> = Vec::new();
    let task = |batch: &[DateTime<Utc>]| -> Result<usize> { Ok(batch.len()) };
    let summary = run_pipeline(source, task, &fast(2, GatingPolicy::Ready), &cancel, |o| {
        batches.push(o.batch.clone());
        if batches.iter().map(Vec::len).sum::<usize>() == 4 {
            cancel.store(true, Ordering::Relaxed);
        }
    })
    .unwrap();

    let flat: Vec<DateTime<Utc>> = batches.concat();
    let expected: Vec<DateTime<Utc>> = (0..4)
        .map(|k| t0() + TimeDelta::seconds(600 * k))
        .collect();
    assert_eq!(flat, expected);
    assert_eq!(summary.units, 4);
    assert_eq!(summary.failed, 0);
}

#[test]
fn test_watch_dir_dispatches_existing_files_in_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["2024_05_03.h5", "2024_05_01.h5", "2024_05_02.h5", "notes.txt"] {
        touch(&dir.path().join(name));
    }
    let root = dir.path().canonicalize().unwrap();
    let cancel = AtomicBool::new(false);

    let mut seen: Vec<PathBuf> = Vec::new();
    let task = |batch: &[PathBuf]| -> Result<()> {
        anyhow::ensure!(batch.iter().all(|p| p.exists()), "missing input");
        Ok(())
    };
    let opts = fast(2, GatingPolicy::Full);
    let summary = shakeflow::watch_dir(
        dir.path(),
        DiscoveryMode::FromOrigin,
        ".h5",
        task,
        &opts,
        &cancel,
        |o| {
            assert!(o.is_success(), "{:?}", o.diagnostic);
            seen.extend(o.batch.iter().cloned());
            // The third file is held back until a fourth arrives.
            if seen.len() == 2 {
                touch(&root.join("2024_05_04.h5"));
            }
            if seen.len() == 4 {
                cancel.store(true, Ordering::Relaxed);
            }
        },
    )
    .unwrap();

    assert_eq!(
        seen,
        vec![
            root.join("2024_05_01.h5"),
            root.join("2024_05_02.h5"),
            root.join("2024_05_03.h5"),
            root.join("2024_05_04.h5"),
        ]
    );
    assert_eq!(summary.batches, 2);
}
