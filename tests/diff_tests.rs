//! Engine scenarios on the in-memory backend

use std::time::{Duration, UNIX_EPOCH};
use treesync::backend::{Backend, CopyContext, VirtualBackend};
use treesync::types::{ActionKind, ActionOutcome, EventSink, FailureKind, SyncEvent};
use treesync::{BackendError, CancelToken, Direction, SyncEngine, SyncError, SyncOptions};

fn options(chunk_size: usize) -> SyncOptions {
    SyncOptions {
        chunk_size,
        ..SyncOptions::default()
    }
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[test]
fn test_single_file_into_empty_target() {
    let fs = VirtualBackend::new();
    fs.add_file("/src/a.txt", vec![b'x'; 10]);
    fs.add_directory("/dst");
    let (events, mut rx) = EventSink::channel();

    let report = SyncEngine::new(&fs, &fs, options(4))
        .with_events(events)
        .run("/src", "/dst")
        .expect("sync");

    assert_eq!(report.copied, 1);
    assert_eq!(report.bytes_copied, 10);
    assert_eq!(fs.read_file("/dst/a.txt"), Some(vec![b'x'; 10]));

    let progress: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::Progress(p) => Some(p.bytes_transferred),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![4, 8, 10]);
}

#[test]
fn test_locked_target_rejects_create_directory() {
    let fs = VirtualBackend::new();
    let source_dir = fs.add_directory("/src/sub");
    let target = fs.add_directory("/dst");
    assert!(fs.lock("/dst"));
    let target = fs.resolve_directory(target.full_path());
    let before = fs.paths();

    let err = fs
        .try_create_directory(&source_dir, &target)
        .expect_err("locked parent");
    assert!(matches!(err, BackendError::Authorization { .. }));
    assert_eq!(fs.paths(), before);
}

#[test]
fn test_cancel_after_first_chunk() {
    let fs = VirtualBackend::new();
    let file = fs.add_file("/src/big.bin", vec![1u8; 12]);
    let target = fs.add_directory("/dst");
    let (events, mut rx) = EventSink::channel();
    let cancel = CancelToken::new();
    cancel.cancel();
    let ctx = CopyContext {
        chunk_size: 4,
        cancel,
        events,
    };

    let err = fs
        .try_copy_file(&fs, &file, &target, &ctx)
        .expect_err("copy cancelled");

    assert!(matches!(err, BackendError::Cancelled { transferred: 4, .. }));
    assert!(!fs.file_exists("/dst/big.bin"));
    let progress: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::Progress(p) => Some(p.bytes_transferred),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![4]);
}

#[test]
fn test_second_run_is_idempotent() {
    let fs = VirtualBackend::new();
    fs.add_file("/src/a.txt", b"a".to_vec());
    fs.add_file("/src/deep/er/b.txt", b"b".to_vec());
    fs.add_directory("/dst");

    let first = SyncEngine::new(&fs, &fs, SyncOptions::default())
        .run("/src", "/dst")
        .expect("first run");
    assert_eq!(first.copied, 2);
    assert_eq!(first.created_dirs, 2);

    let second = SyncEngine::new(&fs, &fs, SyncOptions::default())
        .run("/src", "/dst")
        .expect("second run");
    assert_eq!(second.actions_performed(), 0);
}

#[test]
fn test_partial_failure_isolated_to_one_file() {
    let fs = VirtualBackend::new();
    fs.add_file("/src/a.txt", b"a".to_vec());
    fs.add_file("/src/b.txt", b"b".to_vec());
    fs.add_file("/src/c.txt", b"c".to_vec());
    fs.add_directory("/dst");
    fs.fail_copies_to("/dst/b.txt");
    let (events, mut rx) = EventSink::channel();

    let report = SyncEngine::new(&fs, &fs, SyncOptions::default())
        .with_events(events)
        .run("/src", "/dst")
        .expect("sync");

    assert_eq!(report.copied, 2);
    assert_eq!(report.errors, 1);
    assert!(fs.file_exists("/dst/a.txt"));
    assert!(!fs.file_exists("/dst/b.txt"));
    assert!(fs.file_exists("/dst/c.txt"));

    let failed: Vec<(String, FailureKind)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::Action(record) => match record.outcome {
                ActionOutcome::Failed { kind, .. } => Some((record.path, kind)),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![("/dst/b.txt".to_string(), FailureKind::TransientIo)]);
}

#[test]
fn test_locked_subdirectory_does_not_stop_siblings() {
    let fs = VirtualBackend::new();
    fs.add_file("/src/locked/x.txt", b"x".to_vec());
    fs.add_file("/src/open/y.txt", b"y".to_vec());
    fs.add_directory("/dst/locked");
    fs.add_directory("/dst/open");
    fs.lock("/dst/locked");

    let report = SyncEngine::new(&fs, &fs, SyncOptions::default())
        .run("/src", "/dst")
        .expect("sync");

    assert_eq!(report.errors, 1);
    assert!(!fs.file_exists("/dst/locked/x.txt"));
    assert!(fs.file_exists("/dst/open/y.txt"));
}

#[test]
fn test_mirror_removes_target_only_entries() {
    let fs = VirtualBackend::new();
    let time = UNIX_EPOCH + Duration::from_secs(10_000);
    fs.add_file_with_time("/src/keep.txt", b"k".to_vec(), time);
    fs.add_file_with_time("/dst/keep.txt", b"k".to_vec(), time);
    fs.add_file("/dst/gone.txt", b"g".to_vec());
    fs.add_file("/dst/old/inner.txt", b"i".to_vec());
    let (events, mut rx) = EventSink::channel();

    let report = SyncEngine::new(
        &fs,
        &fs,
        SyncOptions {
            direction: Direction::Mirror,
            ..SyncOptions::default()
        },
    )
    .with_events(events)
    .run("/src", "/dst")
    .expect("mirror");

    assert_eq!(report.skipped, 1);
    assert_eq!(report.deleted_files, 1);
    assert_eq!(report.deleted_dirs, 1);
    assert!(!fs.directory_exists("/dst/old"));

    let kinds: Vec<ActionKind> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::Action(record) => Some(record.kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![ActionKind::Skip, ActionKind::DeleteFile, ActionKind::DeleteDirectory]
    );
}

#[test]
fn test_mirror_locked_child_does_not_stop_sibling_prunes() {
    let fs = VirtualBackend::new();
    fs.add_directory("/src");
    fs.add_file("/dst/a_locked/keep.txt", b"k".to_vec());
    fs.add_directory("/dst/b_stale");
    fs.add_file("/dst/c_stale.txt", b"c".to_vec());
    assert!(fs.lock("/dst/a_locked"));

    let report = SyncEngine::new(
        &fs,
        &fs,
        SyncOptions {
            direction: Direction::Mirror,
            ..SyncOptions::default()
        },
    )
    .run("/src", "/dst")
    .expect("mirror");

    assert_eq!(report.errors, 1);
    assert_eq!(report.deleted_files, 1);
    assert_eq!(report.deleted_dirs, 1);
    assert!(fs.file_exists("/dst/a_locked/keep.txt"));
    assert!(!fs.directory_exists("/dst/b_stale"));
    assert!(!fs.file_exists("/dst/c_stale.txt"));
}

#[test]
fn test_mirror_locked_target_directory_halts_its_level() {
    let fs = VirtualBackend::new();
    fs.add_directory("/src");
    fs.add_file("/dst/one.txt", b"1".to_vec());
    fs.add_file("/dst/two.txt", b"2".to_vec());
    assert!(fs.lock("/dst"));

    let report = SyncEngine::new(
        &fs,
        &fs,
        SyncOptions {
            direction: Direction::Mirror,
            ..SyncOptions::default()
        },
    )
    .run("/src", "/dst")
    .expect("mirror");

    assert_eq!(report.errors, 1);
    assert_eq!(report.deleted_files, 0);
    assert!(fs.file_exists("/dst/one.txt"));
    assert!(fs.file_exists("/dst/two.txt"));
}

#[test]
fn test_missing_roots_are_entry_point_errors() {
    let fs = VirtualBackend::new();
    fs.add_directory("/src");

    let err = SyncEngine::new(&fs, &fs, SyncOptions::default())
        .run("/nope", "/src")
        .expect_err("source missing");
    assert!(matches!(err, SyncError::SourceMissing { .. }));

    let err = SyncEngine::new(&fs, &fs, SyncOptions::default())
        .run("/src", "/nope")
        .expect_err("target missing");
    assert!(matches!(err, SyncError::TargetMissing { .. }));
}

#[test]
fn test_path_spellings_resolve_to_same_entity() {
    let fs = VirtualBackend::new();
    fs.add_file("/a/b/c.txt", b"c".to_vec());

    let canonical = fs.resolve_file("/a/b/c.txt");
    for spelling in ["a/b/c.txt", "/a//b/c.txt", "/a/./b/c.txt", "//a/b//c.txt"] {
        let other = fs.resolve_file(spelling);
        assert!(other.exists(), "{spelling}");
        assert!(canonical.same_entity(&other), "{spelling}");
    }
}
