//! Handle lifecycle: close, shared ownership, views.

use slide_mmap::{
    view::{MappedView, MappedViewMut},
    MappedFile, MappedFileError,
};
use std::fs;
use std::path::PathBuf;
use std::thread;

fn tmp_path(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("slide_mmap_lifecycle_{}_{}", name, std::process::id()));
    p
}

#[test]
fn close_twice_is_safe() {
    let path = tmp_path("close_twice");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    assert!(file.is_open());
    file.close();
    file.close();
    assert!(!file.is_open());

    drop(file);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn every_accessor_fails_after_close() {
    let path = tmp_path("accessors_after_close");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    file.close();

    assert!(matches!(file.size(), Err(MappedFileError::InvalidState(_))));
    assert!(matches!(file.path(), Err(MappedFileError::InvalidState(_))));
    assert!(matches!(
        file.write_access(),
        Err(MappedFileError::InvalidState(_))
    ));
    assert!(matches!(file.as_ptr(), Err(MappedFileError::InvalidState(_))));
    assert!(file.as_slice(0, 1).is_err());
    assert!(file.read_into(0, &mut [0u8; 1]).is_err());
    assert!(file.write_at(0, b"x").is_err());
    assert!(file.flush().is_err());
    assert!(matches!(
        file.lock(true, false),
        Err(MappedFileError::InvalidState(_))
    ));

    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn close_is_observed_by_clones() {
    let path = tmp_path("close_observed");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    let reader = file.clone();
    file.close();
    assert!(!reader.is_open());
    assert!(reader.size().is_err());

    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn data_persists_after_last_clone_drops() {
    let path = tmp_path("last_clone_drops");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    let consumers: Vec<MappedFile> = (0..4).map(|_| file.clone()).collect();
    drop(file);

    for (i, consumer) in consumers.iter().enumerate() {
        consumer.write_at(i as u64 * 8, b"consumer").expect("write");
    }
    drop(consumers);

    let ro = MappedFile::open_ro(&path).expect("reopen");
    assert_eq!(&*ro.as_slice(24, 8).expect("slice"), b"consumer");

    drop(ro);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn views_keep_the_mapping_alive() {
    let path = tmp_path("views_keep_alive");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 8192).expect("create");
    let slot = MappedViewMut::new(file.clone(), 4096, 256).expect("slot");
    slot.write(&[7u8; 256]).expect("write slot");
    let tile = MappedView::new(file.clone(), 4096, 256).expect("tile");
    drop(file);

    assert_eq!(tile.to_vec().expect("tile bytes"), vec![7u8; 256]);
    assert_eq!(tile.offset(), 4096);
    assert_eq!(tile.len(), 256);
    assert!(slot.write(&[0u8; 257]).is_err());

    drop(slot);
    drop(tile);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn views_recheck_bounds_after_shrink() {
    let path = tmp_path("views_recheck");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 8192).expect("create");
    let tile = MappedView::new(file.clone(), 4096, 1024).expect("tile");
    file.resize(4096, false).expect("shrink");
    assert!(matches!(
        tile.as_slice(),
        Err(MappedFileError::OutOfBounds { .. })
    ));
    assert!(MappedView::new(file.clone(), 4000, 200).is_err());

    drop(tile);
    drop(file);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn writable_view_needs_write_access() {
    let path = tmp_path("writable_view_access");
    fs::write(&path, vec![0u8; 1024]).expect("seed");

    let ro = MappedFile::open_ro(&path).expect("open ro");
    assert!(matches!(
        MappedViewMut::new(ro.clone(), 0, 16),
        Err(MappedFileError::InvalidState(_))
    ));

    drop(ro);
    fs::remove_file(&path).expect("cleanup");
}

#[test]
fn concurrent_readers_and_a_resizer() {
    let path = tmp_path("concurrent_resize");
    let _ = fs::remove_file(&path);

    let file = MappedFile::create(&path, 4096).expect("create");
    file.write_at(0, b"HEADER").expect("write header");

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let file = file.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut buf = [0u8; 6];
                    file.read_into(0, &mut buf).expect("read");
                    assert_eq!(&buf, b"HEADER");
                }
            })
        })
        .collect();

    for step in 1..=16u64 {
        file.resize(4096 * (step + 1), false).expect("grow");
    }
    for reader in readers {
        reader.join().expect("reader thread");
    }
    assert_eq!(file.size().expect("size"), 4096 * 17);

    drop(file);
    fs::remove_file(&path).expect("cleanup");
}
