#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::thread;

use common::{boot, boot_with, list, read_file, write_file};
use kvfs::config::{CacheConfig, VfsConfig};
use kvfs::fs::VfsError;

const THREADS: usize = 4;

#[test]
fn concurrent_walks_under_eviction_pressure() {
    let config = VfsConfig {
        dcache: CacheConfig { capacity: 16 },
        icache: CacheConfig { capacity: 256 },
        ..VfsConfig::default()
    };
    let booted = boot_with(config);
    let vfs = &booted.vfs;
    let mut setup = booted.process();
    for d in 0..4 {
        vfs.mkdir(&setup, &format!("/d{d}")).unwrap();
        for f in 0..4 {
            write_file(vfs, &mut setup, &format!("/d{d}/f{f}"), format!("{d}:{f}").as_bytes());
        }
    }

    thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move || {
                let proc = vfs.new_process();
                for i in 0..200 {
                    let (d, f) = ((i + t) % 4, (i * 7 + t) % 4);
                    let meta = vfs.stat(&proc, &format!("/d{d}/f{f}")).unwrap();
                    assert_eq!(meta.size, 3);
                }
            });
        }
    });

    for d in 0..4 {
        for f in 0..4 {
            assert_eq!(
                read_file(vfs, &mut setup, &format!("/d{d}/f{f}")),
                format!("{d}:{f}").as_bytes()
            );
        }
    }
}

#[test]
fn concurrent_creators_in_separate_directories() {
    let booted = boot();
    let vfs = &booted.vfs;

    thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move || {
                let mut proc = vfs.new_process();
                let dir = format!("/t{t}");
                vfs.mkdir(&proc, &dir).unwrap();
                vfs.chdir(&mut proc, &dir).unwrap();
                for i in 0..25 {
                    write_file(vfs, &mut proc, &format!("f{i}"), b"x");
                }
                for i in (0..25).step_by(2) {
                    vfs.unlink(&proc, &format!("f{i}")).unwrap();
                }
                vfs.exit_process(&mut proc);
            });
        }
    });

    let mut proc = booted.process();
    for t in 0..THREADS {
        let names = list(vfs, &mut proc, &format!("/t{t}"));
        assert_eq!(names.len(), 2 + 12, "{names:?}");
    }
}

#[test]
fn concurrent_creates_of_one_name_admit_a_single_winner() {
    let booted = boot();
    let vfs = &booted.vfs;

    let results: Vec<Result<(), VfsError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(move || {
                    let proc = vfs.new_process();
                    vfs.mkdir(&proc, "/contended")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.err())
            .all(|e| e == VfsError::AlreadyExists)
    );
}

#[test]
fn renames_race_with_lookups() {
    let booted = boot();
    let vfs = &booted.vfs;
    let mut setup = booted.process();
    vfs.mkdir(&setup, "/a").unwrap();
    vfs.mkdir(&setup, "/b").unwrap();
    write_file(vfs, &mut setup, "/a/x", b"moving");

    thread::scope(|s| {
        s.spawn(|| {
            let proc = vfs.new_process();
            let mut here = "/a/x";
            for _ in 0..100 {
                let there = if here == "/a/x" { "/b/x" } else { "/a/x" };
                match vfs.rename(&proc, here, there) {
                    Ok(()) => here = there,
                    Err(VfsError::Busy) => {}
                    Err(e) => panic!("unexpected rename error: {e}"),
                }
            }
        });
        for _ in 0..2 {
            s.spawn(|| {
                let proc = vfs.new_process();
                for _ in 0..200 {
                    for path in ["/a/x", "/b/x"] {
                        match vfs.stat(&proc, path) {
                            Ok(meta) => assert_eq!(meta.size, 6),
                            Err(VfsError::NotFound) => {}
                            Err(e) => panic!("unexpected stat error: {e}"),
                        }
                    }
                }
            });
        }
    });

    let in_a = vfs.stat(&setup, "/a/x").is_ok();
    let in_b = vfs.stat(&setup, "/b/x").is_ok();
    assert!(in_a ^ in_b, "the file must live in exactly one directory");
}
