use super::*;
use tempfile::tempdir;

#[test]
fn append_tracks_length() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.data");

    let mut f = AppendableFile::open(&path).unwrap();
    assert_eq!(f.length(), 0);
    f.append(b"hello").unwrap();
    f.append(b" world").unwrap();
    assert_eq!(f.length(), 11);

    // reopen picks up the existing length
    drop(f);
    let f = AppendableFile::open(&path).unwrap();
    assert_eq!(f.length(), 11);
}

#[test]
fn pread_reads_at_offset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.data");
    std::fs::write(&path, b"0123456789").unwrap();

    let f = RandomAccessFile::open(&path).unwrap();
    assert_eq!(f.pread(3, 4).unwrap(), b"3456");
    assert_eq!(f.length().unwrap(), 10);
}

#[test]
fn pread_truncates_at_eof() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.data");
    std::fs::write(&path, b"abc").unwrap();

    let f = RandomAccessFile::open(&path).unwrap();
    assert_eq!(f.pread(1, 100).unwrap(), b"bc");
    assert_eq!(f.pread(3, 10).unwrap(), b"");
    assert_eq!(f.pread(50, 10).unwrap(), b"");
}

#[test]
fn file_lock_is_exclusive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.lock");

    let held = FileLock::acquire(&path).unwrap();
    assert!(FileLock::acquire(&path).is_err());
    assert_eq!(held.path(), path.as_path());

    // releasing lets the next acquire through
    drop(held);
    FileLock::acquire(&path).unwrap();
}

#[test]
fn thread_ids_differ_across_threads() {
    let here = thread_id();
    assert_eq!(here, thread_id()); // stable within a thread
    let there = std::thread::spawn(thread_id).join().unwrap();
    assert_ne!(here, there);
}
