#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::sync::Arc;

use common::{boot, boot_with, read_file, write_file};
use kvfs::config::VfsConfig;
use kvfs::fs::ramfs::RamFs;
use kvfs::fs::{InodeKind, MountFlags, OpenFlags, VfsError, WalkFlags};

#[test]
fn resolves_nested_directories() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/a").unwrap();
    vfs.mkdir(&proc, "/a/b").unwrap();
    write_file(vfs, &mut proc, "/a/b/c", b"deep");

    let c = vfs.walk(None, "/a/b/c", WalkFlags::empty()).unwrap().dentry;
    assert_eq!(c.name().as_str(), "c");
    assert_eq!(vfs.path_of(&c).unwrap(), "/a/b/c");
    assert_eq!(read_file(vfs, &mut proc, "a//b/./c"), b"deep");
}

#[test]
fn dot_dot_climbs_and_stops_at_root() {
    let booted = boot();
    let proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/a").unwrap();
    vfs.mkdir(&proc, "/a/b").unwrap();

    let a = vfs.walk(None, "/a/b/..", WalkFlags::empty()).unwrap().dentry;
    assert_eq!(vfs.path_of(&a).unwrap(), "/a");
    let root = vfs.walk(None, "/../..", WalkFlags::empty()).unwrap().dentry;
    assert!(Arc::ptr_eq(&*root, vfs.root()));
}

#[test]
fn relative_paths_start_at_cwd() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/home").unwrap();
    vfs.chdir(&mut proc, "/home").unwrap();
    write_file(vfs, &mut proc, "notes", b"hi");

    assert_eq!(read_file(vfs, &mut proc, "/home/notes"), b"hi");
    assert_eq!(vfs.stat(&proc, "notes").unwrap().size, 2);
}

#[test]
fn parent_walk_returns_trailing_component() {
    let booted = boot();
    let proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/a").unwrap();

    let walked = vfs.walk(None, "/a/missing", WalkFlags::PARENT).unwrap();
    assert_eq!(vfs.path_of(&walked.dentry).unwrap(), "/a");
    assert_eq!(walked.trailing.unwrap().as_str(), "missing");

    let root = vfs.walk(None, "/", WalkFlags::PARENT).unwrap();
    assert!(root.trailing.is_none());
}

#[test]
fn mkparent_creates_only_the_final_component() {
    let booted = boot();
    let proc = booted.process();
    let vfs = &booted.vfs;

    let made = vfs.walk(None, "/fresh", WalkFlags::MKPARENT).unwrap().dentry;
    assert_eq!(made.kind(), Some(InodeKind::Directory));
    assert!(vfs.stat(&proc, "/fresh").is_ok());

    assert_eq!(
        vfs.walk(None, "/nope/inner", WalkFlags::MKPARENT)
            .unwrap_err(),
        VfsError::NotFound
    );
    assert_eq!(vfs.stat(&proc, "/nope").unwrap_err(), VfsError::NotFound);
}

#[test]
fn component_through_a_file_is_not_a_directory() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/file", b"");

    assert_eq!(
        vfs.stat(&proc, "/file/child").unwrap_err(),
        VfsError::NotADirectory
    );
}

#[test]
fn overlong_names_and_paths_are_rejected() {
    let config = VfsConfig {
        name_max: 8,
        path_max: 32,
        ..VfsConfig::default()
    };
    let booted = boot_with(config);
    let proc = booted.process();
    let vfs = &booted.vfs;

    assert!(vfs.mkdir(&proc, "/1234567").is_ok());
    assert_eq!(
        vfs.mkdir(&proc, "/12345678").unwrap_err(),
        VfsError::NameTooLong
    );
    let long = "/a".repeat(17);
    assert_eq!(vfs.stat(&proc, &long).unwrap_err(), VfsError::NameTooLong);
}

#[test]
fn control_characters_are_invalid() {
    let booted = boot();
    let proc = booted.process();
    assert_eq!(
        booted.vfs.mkdir(&proc, "/bad\u{7}name").unwrap_err(),
        VfsError::InvalidArgument
    );
}

#[test]
fn symlinks_are_followed_unless_nofollow() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/dir").unwrap();
    write_file(vfs, &mut proc, "/dir/x", b"through");
    vfs.symlink(&proc, "/ld", "dir").unwrap();
    vfs.symlink(&proc, "/lx", "/dir/x").unwrap();

    assert_eq!(read_file(vfs, &mut proc, "/ld/x"), b"through");
    assert_eq!(read_file(vfs, &mut proc, "/lx"), b"through");
    assert_eq!(vfs.lstat(&proc, "/lx").unwrap().kind, InodeKind::Symlink);
    assert_eq!(vfs.stat(&proc, "/lx").unwrap().kind, InodeKind::File);

    let link = vfs.walk(None, "/lx", WalkFlags::NOFOLLOW).unwrap().dentry;
    assert_eq!(link.kind(), Some(InodeKind::Symlink));
}

#[test]
fn symlink_chain_depth_is_bounded() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/t", b"end");
    vfs.symlink(&proc, "/l0", "t").unwrap();
    for i in 1..=4 {
        vfs.symlink(&proc, &format!("/l{i}"), &format!("l{}", i - 1))
            .unwrap();
    }

    let end = vfs
        .walk_with_depth(None, "/l3", WalkFlags::empty(), 4)
        .unwrap()
        .dentry;
    assert_eq!(end.kind(), Some(InodeKind::File));
    assert_eq!(
        vfs.walk_with_depth(None, "/l4", WalkFlags::empty(), 4)
            .unwrap_err(),
        VfsError::SymlinkLoop
    );
    assert!(
        vfs.walk_with_depth(None, "/l4", WalkFlags::NOFOLLOW, 4)
            .is_ok()
    );
}

#[test]
fn symlink_loop_is_detected() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.symlink(&proc, "/self", "self").unwrap();
    vfs.symlink(&proc, "/ping", "pong").unwrap();
    vfs.symlink(&proc, "/pong", "ping").unwrap();

    assert_eq!(vfs.stat(&proc, "/self").unwrap_err(), VfsError::SymlinkLoop);
    assert_eq!(
        vfs.open(&mut proc, "/ping", OpenFlags::empty()).unwrap_err(),
        VfsError::SymlinkLoop
    );
    assert_eq!(vfs.readlink(&proc, "/ping").unwrap(), "pong");
}

#[test]
fn resolved_target_is_spliced_under_link_directory() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/src").unwrap();
    vfs.mkdir(&proc, "/d").unwrap();
    write_file(vfs, &mut proc, "/src/f", b"payload");
    vfs.symlink(&proc, "/d/l", "/src/f").unwrap();

    let target = vfs.walk(None, "/d/l", WalkFlags::empty()).unwrap().dentry;
    let d = vfs.walk(None, "/d", WalkFlags::empty()).unwrap().dentry;
    assert!(Arc::ptr_eq(&target.parent().unwrap(), &*d));

    // The backend still knows the file under its real name.
    assert_eq!(read_file(vfs, &mut proc, "/src/f"), b"payload");
}

#[test]
fn spliced_target_is_visible_under_its_name_in_the_link_directory() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/src").unwrap();
    vfs.mkdir(&proc, "/d").unwrap();
    write_file(vfs, &mut proc, "/src/f", b"payload");
    vfs.symlink(&proc, "/d/l", "/src/f").unwrap();
    assert_eq!(vfs.stat(&proc, "/d/f").unwrap_err(), VfsError::NotFound);

    vfs.stat(&proc, "/d/l").unwrap();

    // The backend has no /d/f, but the cache now answers for it.
    let alias = vfs.stat(&proc, "/d/f").unwrap();
    assert_eq!(alias.id, vfs.stat(&proc, "/src/f").unwrap().id);
    assert_eq!(read_file(vfs, &mut proc, "/d/f"), b"payload");
    assert_eq!(vfs.mkdir(&proc, "/d/f").unwrap_err(), VfsError::AlreadyExists);

    let cached = vfs.walk(None, "/d/f", WalkFlags::empty()).unwrap().dentry.unpin();
    vfs.dcache().free(&cached);
    assert_eq!(vfs.stat(&proc, "/d/f").unwrap_err(), VfsError::NotFound);
    assert_eq!(read_file(vfs, &mut proc, "/d/l"), b"payload");
}

#[test]
fn busy_target_is_not_spliced() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/src").unwrap();
    vfs.mkdir(&proc, "/d").unwrap();
    write_file(vfs, &mut proc, "/src/f", b"payload");
    vfs.symlink(&proc, "/d/l", "/src/f").unwrap();

    let fd = vfs.open(&mut proc, "/src/f", OpenFlags::empty()).unwrap();
    let target = vfs.walk(None, "/d/l", WalkFlags::empty()).unwrap().dentry;
    assert_eq!(vfs.path_of(&target).unwrap(), "/src/f");
    drop(target);
    vfs.close(&mut proc, fd).unwrap();
}

#[test]
fn fsrelative_walk_resolves_against_superblock_root() {
    let booted = boot();
    let proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/mnt").unwrap();
    vfs.mount(&proc, "/mnt", RamFs::NAME, MountFlags::empty())
        .unwrap();
    vfs.mkdir(&proc, "/mnt/sub").unwrap();
    vfs.mkdir(&proc, "/mnt/x").unwrap();
    vfs.mkdir(&proc, "/x").unwrap();

    let sub = vfs.walk(None, "/mnt/sub", WalkFlags::empty()).unwrap().dentry;
    let inner = vfs
        .walk(Some(&*sub), "/x", WalkFlags::FSRELATIVE)
        .unwrap()
        .dentry;
    assert_eq!(vfs.path_of(&inner).unwrap(), "/mnt/x");

    let global = vfs.walk(Some(&*sub), "/x", WalkFlags::empty()).unwrap().dentry;
    assert_eq!(vfs.path_of(&global).unwrap(), "/x");
}
