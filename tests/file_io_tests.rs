#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use common::{boot, boot_with, read_file, read_to_end, write_file};
use kvfs::config::VfsConfig;
use kvfs::fs::{Dirent, Fd, InodeKind, OpenFlags, SeekWhence, VfsError, WalkFlags};

#[test]
fn write_then_read_back() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;

    let fd = vfs.open(&mut proc, "/f", OpenFlags::CREATE).unwrap();
    assert_eq!(fd, Fd(0));
    assert_eq!(vfs.write(&proc, fd, b"hello, ").unwrap(), 7);
    assert_eq!(vfs.write(&proc, fd, b"world").unwrap(), 5);
    assert_eq!(vfs.fstat(&proc, fd).unwrap().size, 12);

    vfs.lseek(&proc, fd, 0, SeekWhence::Set).unwrap();
    assert_eq!(read_to_end(vfs, &proc, fd), b"hello, world");
    vfs.close(&mut proc, fd).unwrap();

    assert_eq!(read_file(vfs, &mut proc, "/f"), b"hello, world");
}

#[test]
fn writes_spanning_pages_survive_reclaim() {
    let config = VfsConfig {
        page_size: 16,
        ..VfsConfig::default()
    };
    let booted = boot_with(config);
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    let body: Vec<u8> = (0..100u8).collect();
    write_file(vfs, &mut proc, "/big", &body);

    vfs.dcache().evict_half();
    vfs.icache().evict_half();
    assert_eq!(read_file(vfs, &mut proc, "/big"), body);
}

#[test]
fn lseek_moves_the_position() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/f", b"0123456789");
    let fd = vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap();

    assert_eq!(vfs.lseek(&proc, fd, 2, SeekWhence::Set).unwrap(), 2);
    let mut buf = [0u8; 3];
    assert_eq!(vfs.read(&proc, fd, &mut buf).unwrap(), 3);
    assert_eq!(&buf, b"234");

    assert_eq!(vfs.lseek(&proc, fd, 1, SeekWhence::Cur).unwrap(), 6);
    assert_eq!(read_to_end(vfs, &proc, fd), b"6789");

    assert_eq!(vfs.lseek(&proc, fd, -3, SeekWhence::End).unwrap(), 7);
    assert_eq!(
        vfs.lseek(&proc, fd, -1, SeekWhence::Set).unwrap_err(),
        VfsError::InvalidArgument
    );
    assert_eq!(vfs.lseek(&proc, fd, 5, SeekWhence::End).unwrap(), 15);
    assert_eq!(vfs.read(&proc, fd, &mut buf).unwrap(), 0);
    vfs.close(&mut proc, fd).unwrap();
}

#[test]
fn append_writes_at_the_end() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/log", b"abc");

    let fd = vfs.open(&mut proc, "/log", OpenFlags::APPEND).unwrap();
    vfs.lseek(&proc, fd, 0, SeekWhence::Set).unwrap();
    vfs.write(&proc, fd, b"def").unwrap();
    vfs.close(&mut proc, fd).unwrap();

    assert_eq!(read_file(vfs, &mut proc, "/log"), b"abcdef");
}

#[test]
fn page_cache_defers_backend_writes_until_commit() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;

    let fd = vfs.open(&mut proc, "/f", OpenFlags::CREATE).unwrap();
    vfs.write(&proc, fd, b"buffered").unwrap();
    let inode = vfs
        .walk(None, "/f", WalkFlags::empty())
        .unwrap()
        .dentry
        .inode()
        .unwrap();
    assert_eq!(booted.stats.writes(), 0);
    assert_eq!(inode.page_cache().unwrap().dirty_pages(), 1);

    vfs.fsync(&proc, fd).unwrap();
    assert_eq!(booted.stats.writes(), 1);
    assert_eq!(booted.stats.syncs(), 1);
    assert_eq!(inode.page_cache().unwrap().dirty_pages(), 0);

    vfs.write(&proc, fd, b" more").unwrap();
    vfs.close(&mut proc, fd).unwrap();
    assert_eq!(booted.stats.writes(), 2, "close commits the second write");
}

#[test]
fn direct_io_bypasses_the_page_cache() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;

    let fd = vfs
        .open(&mut proc, "/raw", OpenFlags::CREATE | OpenFlags::DIRECT)
        .unwrap();
    vfs.write(&proc, fd, b"abc").unwrap();
    assert_eq!(booted.stats.writes(), 1);

    vfs.lseek(&proc, fd, 0, SeekWhence::Set).unwrap();
    let reads = booted.stats.reads();
    assert_eq!(read_to_end(vfs, &proc, fd), b"abc");
    assert!(booted.stats.reads() > reads);
    vfs.close(&mut proc, fd).unwrap();
}

#[test]
fn readdir_yields_dot_entries_then_sorted_names() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/d").unwrap();
    for name in ["b", "a", "c"] {
        write_file(vfs, &mut proc, &format!("/d/{name}"), b"");
    }
    vfs.mkdir(&proc, "/d/z").unwrap();
    vfs.symlink(&proc, "/d/y", "a").unwrap();

    let fd = vfs.open(&mut proc, "/d", OpenFlags::empty()).unwrap();
    let mut dirent = Dirent::default();
    let mut seen = Vec::new();
    while vfs.readdir(&proc, fd, &mut dirent).unwrap() {
        seen.push((dirent.name.clone(), dirent.kind));
    }
    assert_eq!(dirent.offset, 7);
    assert_eq!(
        seen,
        vec![
            (".".to_owned(), Some(InodeKind::Directory)),
            ("..".to_owned(), Some(InodeKind::Directory)),
            ("a".to_owned(), Some(InodeKind::File)),
            ("b".to_owned(), Some(InodeKind::File)),
            ("c".to_owned(), Some(InodeKind::File)),
            ("y".to_owned(), Some(InodeKind::Symlink)),
            ("z".to_owned(), Some(InodeKind::Directory)),
        ]
    );

    dirent.offset = 3;
    assert!(vfs.readdir(&proc, fd, &mut dirent).unwrap());
    assert_eq!(dirent.name, "b");
    vfs.close(&mut proc, fd).unwrap();
}

#[test]
fn io_checks_the_file_kind() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/d").unwrap();
    write_file(vfs, &mut proc, "/f", b"x");

    let dir = vfs.open(&mut proc, "/d", OpenFlags::empty()).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(vfs.read(&proc, dir, &mut buf).unwrap_err(), VfsError::IsADirectory);
    assert_eq!(vfs.write(&proc, dir, b"no").unwrap_err(), VfsError::IsADirectory);

    let file = vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap();
    assert_eq!(
        vfs.readdir(&proc, file, &mut Dirent::default()).unwrap_err(),
        VfsError::NotADirectory
    );
    vfs.exit_process(&mut proc);
}

#[test]
fn dup_shares_the_position() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/f", b"abcdef");

    let fd = vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap();
    let copy = vfs.dup(&mut proc, fd).unwrap();
    assert_eq!(copy, Fd(1));

    let mut buf = [0u8; 2];
    vfs.read(&proc, copy, &mut buf).unwrap();
    assert_eq!(&buf, b"ab");
    vfs.read(&proc, fd, &mut buf).unwrap();
    assert_eq!(&buf, b"cd");

    vfs.close(&mut proc, fd).unwrap();
    vfs.read(&proc, copy, &mut buf).unwrap();
    assert_eq!(&buf, b"ef");
    vfs.close(&mut proc, copy).unwrap();
    assert_eq!(vfs.stat(&proc, "/f").unwrap().open_count, 0);
}

#[test]
fn dup2_replaces_the_target_descriptor() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/one", b"1");
    write_file(vfs, &mut proc, "/two", b"2");

    let one = vfs.open(&mut proc, "/one", OpenFlags::empty()).unwrap();
    let two = vfs.open(&mut proc, "/two", OpenFlags::empty()).unwrap();
    assert_eq!(vfs.dup2(&mut proc, one, two).unwrap(), two);

    assert_eq!(vfs.stat(&proc, "/two").unwrap().open_count, 0);
    assert_eq!(vfs.stat(&proc, "/one").unwrap().open_count, 1);
    let mut buf = [0u8; 1];
    vfs.read(&proc, two, &mut buf).unwrap();
    assert_eq!(&buf, b"1");

    assert_eq!(vfs.dup2(&mut proc, one, one).unwrap(), one);
    let max = vfs.config().max_fds;
    assert_eq!(
        vfs.dup2(&mut proc, one, Fd(max)).unwrap_err(),
        VfsError::BadDescriptor
    );
    assert_eq!(
        vfs.dup2(&mut proc, Fd(9), one).unwrap_err(),
        VfsError::BadDescriptor
    );
    vfs.exit_process(&mut proc);
    assert_eq!(vfs.stat(&proc, "/one").unwrap().open_count, 0);
}

#[test]
fn descriptor_table_has_a_fixed_size() {
    let config = VfsConfig {
        max_fds: 3,
        ..VfsConfig::default()
    };
    let booted = boot_with(config);
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/f", b"");

    let fds: Vec<Fd> = (0..3)
        .map(|_| vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap())
        .collect();
    assert_eq!(fds, vec![Fd(0), Fd(1), Fd(2)]);
    assert_eq!(
        vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap_err(),
        VfsError::TooManyOpenFiles
    );
    assert_eq!(
        vfs.open(&mut proc, "/new", OpenFlags::CREATE).unwrap_err(),
        VfsError::TooManyOpenFiles
    );
    assert_eq!(vfs.stat(&proc, "/new").unwrap_err(), VfsError::NotFound);
    assert_eq!(vfs.dup(&mut proc, fds[0]).unwrap_err(), VfsError::TooManyOpenFiles);
    assert_eq!(vfs.stat(&proc, "/f").unwrap().open_count, 3);

    vfs.close(&mut proc, fds[1]).unwrap();
    assert_eq!(vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap(), Fd(1));
}

#[test]
fn closed_descriptors_are_bad() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    let fd = vfs.open(&mut proc, "/f", OpenFlags::CREATE).unwrap();
    vfs.close(&mut proc, fd).unwrap();

    assert_eq!(vfs.close(&mut proc, fd).unwrap_err(), VfsError::BadDescriptor);
    let mut buf = [0u8; 1];
    assert_eq!(vfs.read(&proc, fd, &mut buf).unwrap_err(), VfsError::BadDescriptor);
    assert_eq!(vfs.fstat(&proc, Fd(1000)).unwrap_err(), VfsError::BadDescriptor);
}

#[test]
fn getcwd_and_realpath_respect_buffer_size() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    assert_eq!(vfs.getcwd(&proc, 64).unwrap(), "/");

    vfs.mkdir(&proc, "/home").unwrap();
    vfs.mkdir(&proc, "/home/user").unwrap();
    vfs.chdir(&mut proc, "/home/user").unwrap();

    assert_eq!(vfs.getcwd(&proc, 64).unwrap(), "/home/user");
    assert_eq!(vfs.getcwd(&proc, 11).unwrap(), "/home/user");
    assert_eq!(vfs.getcwd(&proc, 10).unwrap_err(), VfsError::Range);
    assert_eq!(vfs.getcwd(&proc, 1).unwrap_err(), VfsError::Range);

    let fd = vfs.open(&mut proc, "notes", OpenFlags::CREATE).unwrap();
    assert_eq!(vfs.realpathat(&proc, fd, 64).unwrap(), "/home/user/notes");
    assert_eq!(vfs.realpathat(&proc, fd, 8).unwrap_err(), VfsError::Range);
    vfs.exit_process(&mut proc);
}

#[test]
fn fchdir_uses_an_open_directory() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    vfs.mkdir(&proc, "/srv").unwrap();
    write_file(vfs, &mut proc, "/f", b"");

    let dir = vfs.open(&mut proc, "/srv", OpenFlags::empty()).unwrap();
    vfs.fchdir(&mut proc, dir).unwrap();
    assert_eq!(vfs.getcwd(&proc, 64).unwrap(), "/srv");

    let file = vfs.open(&mut proc, "/f", OpenFlags::empty()).unwrap();
    assert_eq!(vfs.fchdir(&mut proc, file).unwrap_err(), VfsError::NotADirectory);
    assert_eq!(vfs.chdir(&mut proc, "/f").unwrap_err(), VfsError::NotADirectory);
    assert_eq!(vfs.getcwd(&proc, 64).unwrap(), "/srv");
    vfs.exit_process(&mut proc);
}

#[test]
fn stat_reports_kind_size_and_times() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;
    write_file(vfs, &mut proc, "/f", b"12345");

    let meta = vfs.stat(&proc, "/f").unwrap();
    assert_eq!(meta.kind, InodeKind::File);
    assert_eq!(meta.size, 5);
    assert_eq!(meta.link_count, 1);
    assert!(meta.modified >= meta.created);
    assert_eq!(vfs.stat(&proc, "/").unwrap().kind, InodeKind::Directory);
}

#[test]
fn offsets_past_the_file_size_limit_are_refused() {
    let booted = boot();
    let mut proc = booted.process();
    let vfs = &booted.vfs;

    for flags in [OpenFlags::CREATE, OpenFlags::CREATE | OpenFlags::DIRECT] {
        let fd = vfs.open(&mut proc, "/sparse", flags).unwrap();
        assert_eq!(
            vfs.lseek(&proc, fd, i64::MAX, SeekWhence::Set).unwrap_err(),
            VfsError::InvalidArgument
        );
        assert_eq!(vfs.lseek(&proc, fd, 1 << 32, SeekWhence::Set).unwrap(), 1 << 32);
        assert_eq!(
            vfs.write(&proc, fd, b"x").unwrap_err(),
            VfsError::Backend(libc::EFBIG)
        );
        assert_eq!(vfs.fstat(&proc, fd).unwrap().size, 0);
        vfs.close(&mut proc, fd).unwrap();
    }
}
