//! Advisory lock contract through `MappedFile`.

use slide_mmap::{LockState, MappedFile};
use std::fs;
use std::path::PathBuf;

fn tmp_path(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("slide_mmap_lock_{}_{}", name, std::process::id()));
    p
}

#[test]
fn lock_then_unlock_succeeds() {
    let path = tmp_path("lock_then_unlock");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    assert!(file.lock(true, false).expect("lock"));
    assert_eq!(file.lock_state(), LockState::Exclusive);
    file.unlock().expect("unlock");
    assert_eq!(file.lock_state(), LockState::Unlocked);

    // unlocking with nothing held is a no-op
    file.unlock().expect("unlock again");

    assert!(file.lock(false, true).expect("shared lock"));
    assert_eq!(file.lock_state(), LockState::Shared);

    drop(file);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn close_releases_the_lock() {
    let path = tmp_path("close_releases");
    let _ = fs::remove_file(&path);

    let writer = MappedFile::create(&path, 4096).expect("create");
    assert!(writer.lock(true, false).expect("lock"));
    writer.close();
    assert_eq!(writer.lock_state(), LockState::Unlocked);

    let other = MappedFile::open_rw(&path).expect("open");
    assert!(other.lock(true, false).expect("lock after close"));

    drop(other);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
#[cfg(all(unix, not(feature = "sandbox")))]
fn handles_on_the_same_file_contend() {
    let path = tmp_path("contend");
    let _ = fs::remove_file(&path);

    let writer = MappedFile::create(&path, 4096).expect("create");
    let reader = MappedFile::open_ro(&path).expect("open ro");

    assert!(writer.lock(true, false).expect("exclusive"));
    assert!(!reader.lock(false, false).expect("shared should be refused"));
    assert_eq!(reader.lock_state(), LockState::Unlocked);

    writer.unlock().expect("unlock");
    assert!(reader.lock(false, false).expect("shared"));
    assert!(!writer.lock(true, false).expect("exclusive should be refused"));

    // the lock does not fence mapped writes
    writer.write_at(0, b"seen").expect("write");
    let mut buf = [0u8; 4];
    reader.read_into(0, &mut buf).expect("read");
    assert_eq!(&buf, b"seen");

    drop(reader);
    drop(writer);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
#[cfg(all(unix, not(feature = "sandbox")))]
fn refused_upgrade_reports_the_lock_actually_held() {
    let path = tmp_path("refused_upgrade");
    let _ = fs::remove_file(&path);

    let a = MappedFile::create(&path, 4096).expect("create");
    let b = MappedFile::open_rw(&path).expect("open b");
    let c = MappedFile::open_rw(&path).expect("open c");

    assert!(a.lock(false, false).expect("a shared"));
    assert!(b.lock(false, false).expect("b shared"));
    assert!(!a.lock(true, false).expect("upgrade refused while b holds shared"));
    assert_eq!(a.lock_state(), LockState::Shared);

    // a still holds its shared lock, so c is kept out after b leaves
    b.unlock().expect("unlock b");
    assert!(!c.lock(true, false).expect("exclusive refused while a holds shared"));
    assert_eq!(c.lock_state(), LockState::Unlocked);

    a.unlock().expect("unlock a");
    assert_eq!(a.lock_state(), LockState::Unlocked);
    assert!(c.lock(true, false).expect("exclusive once a unlocks"));

    drop(c);
    drop(b);
    drop(a);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
#[cfg(all(unix, not(feature = "sandbox")))]
fn clones_locking_concurrently_leave_state_in_step() {
    let path = tmp_path("clones_concurrent");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let handle = file.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    let exclusive = (i + round) % 2 == 0;
                    assert!(handle.lock(exclusive, true).expect("lock"));
                    handle.unlock().expect("unlock");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(file.lock_state(), LockState::Unlocked);

    let other = MappedFile::open_rw(&path).expect("open");
    assert!(other.lock(true, false).expect("nothing left held"));

    drop(other);
    drop(file);
    fs::remove_file(&path).expect("cleanup");
}
