//! Tests for content hashing and the checksum comparison policy

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use treesync::backend::{Backend, LocalBackend, VirtualBackend};
use treesync::hash::{hash_file, hash_stream};
use treesync::{ComparePolicy, SyncEngine, SyncOptions};

fn utf8(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

fn checksum_options() -> SyncOptions {
    SyncOptions {
        compare: ComparePolicy::Checksum,
        ..SyncOptions::default()
    }
}

#[test]
fn test_hash_stream_deterministic() {
    let first = hash_stream(Cursor::new(b"same bytes")).expect("hash");
    let second = hash_stream(Cursor::new(b"same bytes")).expect("hash");
    let other = hash_stream(Cursor::new(b"other bytes")).expect("hash");

    assert_eq!(first, second);
    assert_ne!(first, other);
}

#[test]
fn test_hash_stream_matches_blake3() {
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 13) as u8).collect();
    let hash = hash_stream(Cursor::new(&data)).expect("hash");
    assert_eq!(hash, *blake3::hash(&data).as_bytes());
}

#[test]
fn test_hash_file_on_local_backend() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("a.bin");
    fs::write(&path, b"hash me").expect("write file");

    let local = LocalBackend::new();
    let file = local.resolve_file(utf8(&path));
    let hash = hash_file(&local, &file).expect("hash file");
    assert_eq!(hash, *blake3::hash(b"hash me").as_bytes());
}

#[test]
fn test_hash_missing_file_fails() {
    let fs_mem = VirtualBackend::new();
    let missing = fs_mem.resolve_file("/nope.txt");
    assert!(hash_file(&fs_mem, &missing).is_err());
}

#[test]
fn test_checksum_mismatch_same_size_is_copied() {
    let fs_mem = VirtualBackend::new();
    let old = UNIX_EPOCH + Duration::from_secs(1_000);
    fs_mem.add_file_with_time("/src/a.txt", b"AAAA".to_vec(), old);
    fs_mem.add_file_with_time("/dst/a.txt", b"BBBB".to_vec(), old);

    let report = SyncEngine::new(&fs_mem, &fs_mem, checksum_options())
        .run("/src", "/dst")
        .expect("sync");

    assert_eq!(report.copied, 1);
    assert_eq!(fs_mem.read_file("/dst/a.txt").as_deref(), Some(&b"AAAA"[..]));
}

#[test]
fn test_checksum_match_skips_despite_newer_source() {
    let fs_mem = VirtualBackend::new();
    fs_mem.add_file_with_time(
        "/src/a.txt",
        b"same".to_vec(),
        SystemTime::now(),
    );
    fs_mem.add_file_with_time(
        "/dst/a.txt",
        b"same".to_vec(),
        UNIX_EPOCH + Duration::from_secs(1_000),
    );

    let report = SyncEngine::new(&fs_mem, &fs_mem, checksum_options())
        .run("/src", "/dst")
        .expect("sync");

    assert_eq!(report.copied, 0);
    assert_eq!(report.skipped, 1);
}

#[test]
fn test_size_and_time_copies_newer_source() {
    let fs_mem = VirtualBackend::new();
    fs_mem.add_file_with_time("/src/a.txt", b"same".to_vec(), SystemTime::now());
    fs_mem.add_file_with_time(
        "/dst/a.txt",
        b"same".to_vec(),
        UNIX_EPOCH + Duration::from_secs(1_000),
    );

    let report = SyncEngine::new(&fs_mem, &fs_mem, SyncOptions::default())
        .run("/src", "/dst")
        .expect("sync");
    assert_eq!(report.copied, 1);
}

#[test]
fn test_size_mismatch_always_overwrites() {
    let fs_mem = VirtualBackend::new();
    let time = UNIX_EPOCH + Duration::from_secs(5_000);
    fs_mem.add_file_with_time("/src/a.txt", b"longer".to_vec(), time);
    fs_mem.add_file_with_time("/dst/a.txt", b"short".to_vec(), time + Duration::from_secs(600));

    for compare in [
        ComparePolicy::SizeOnly,
        ComparePolicy::default(),
        ComparePolicy::Checksum,
    ] {
        fs_mem.add_file_with_time("/dst/a.txt", b"short".to_vec(), time + Duration::from_secs(600));
        let options = SyncOptions {
            compare,
            ..SyncOptions::default()
        };
        let report = SyncEngine::new(&fs_mem, &fs_mem, options)
            .run("/src", "/dst")
            .expect("sync");
        assert_eq!(report.copied, 1, "{compare:?}");
    }
}
