//! Growth and promotion of micro directories

use zap_rs::{DirFormat, MemStore, ObjectStore, ZapBuilder, ZapDirs, ZapError, MAX_NAME_LEN};

/// 512-byte blocks growing to at most 1K (7 then 15 slots)
fn small_engine() -> ZapDirs<MemStore> {
    ZapBuilder::new()
        .initial_block_size(512)
        .micro_max_block_size(1024)
        .build()
        .unwrap()
}

fn name(i: u64) -> String {
    format!("entry-{:03}", i)
}

#[test]
fn test_block_doubles_when_full() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    for i in 0..7 {
        dirs.add_u64(dir, &name(i), i, &tx).unwrap();
    }
    let stats = dirs.stats(dir).unwrap();
    assert_eq!((stats.block_size, stats.num_slots), (512, Some(7)));

    dirs.add_u64(dir, &name(7), 7, &tx).unwrap();
    let stats = dirs.stats(dir).unwrap();
    assert_eq!(stats.format, DirFormat::Micro);
    assert_eq!((stats.block_size, stats.num_slots), (1024, Some(15)));
}

#[test]
fn test_overflowing_max_block_promotes() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    let salt = dirs.stats(dir).unwrap().salt;

    for i in 0..15 {
        dirs.add_u64(dir, &name(i), i * 100, &tx).unwrap();
    }
    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Micro);

    dirs.add_u64(dir, &name(15), 1500, &tx).unwrap();
    let stats = dirs.stats(dir).unwrap();
    assert_eq!(stats.format, DirFormat::Extended);
    assert_eq!(stats.num_entries, 16);
    assert_eq!(stats.salt, salt);

    for i in 0..16 {
        assert_eq!(dirs.lookup_u64(dir, &name(i)).unwrap(), i * 100);
    }
    dirs.store().commit(tx).unwrap();
}

#[test]
fn test_cursor_positions_survive_promotion() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    for i in 0..15 {
        dirs.add_u64(dir, &name(i), i, &tx).unwrap();
    }

    // Exact position of every entry, taken before advancing past it
    let mut positions = Vec::new();
    let mut cursor = dirs.cursor_init(dir, 0);
    while let Some(attr) = dirs.cursor_retrieve(&mut cursor).unwrap() {
        positions.push((dirs.cursor_serialize(&cursor), attr.name));
        dirs.cursor_advance(&mut cursor);
    }
    assert_eq!(positions.len(), 15);

    dirs.add_u64(dir, "trigger", 0, &tx).unwrap();
    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Extended);

    for (position, expected) in &positions {
        let mut cursor = dirs.cursor_init(dir, *position);
        let attr = dirs.cursor_retrieve(&mut cursor).unwrap().unwrap();
        assert_eq!(&attr.name, expected);
        assert_eq!(dirs.cursor_serialize(&cursor), *position);
    }
}

#[test]
fn test_long_name_promotes_on_add() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    dirs.add_u64(dir, "short", 1, &tx).unwrap();

    let long = "n".repeat(MAX_NAME_LEN + 10);
    dirs.add_u64(dir, &long, 2, &tx).unwrap();

    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Extended);
    assert_eq!(dirs.lookup_u64(dir, &long).unwrap(), 2);
    assert_eq!(dirs.lookup_u64(dir, "short").unwrap(), 1);
}

#[test]
fn test_max_length_name_stays_micro() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    let longest = "m".repeat(MAX_NAME_LEN);
    dirs.add_u64(dir, &longest, 3, &tx).unwrap();
    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Micro);
    assert_eq!(dirs.lookup_u64(dir, &longest).unwrap(), 3);
}

#[test]
fn test_update_with_array_promotes() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    dirs.add_u64(dir, "k", 1, &tx).unwrap();

    dirs.update(dir, "k", 2, &[10, 20, 30], &tx).unwrap();
    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Extended);
    assert_eq!(dirs.lookup(dir, "k", 2, 3).unwrap(), vec![10, 20, 30]);
    assert!(matches!(
        dirs.lookup_u64(dir, "k"),
        Err(ZapError::TypeMismatch { width: 2, count: 3, .. })
    ));
}

#[test]
fn test_extended_directory_keeps_working() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    for i in 0..40 {
        dirs.add_u64(dir, &name(i), i, &tx).unwrap();
    }
    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Extended);

    for i in (0..40).step_by(2) {
        dirs.remove(dir, &name(i), &tx).unwrap();
    }
    dirs.update_u64(dir, &name(1), 1000, &tx).unwrap();
    assert!(matches!(
        dirs.add_u64(dir, &name(3), 0, &tx),
        Err(ZapError::AlreadyExists(_))
    ));

    assert_eq!(dirs.count(dir).unwrap(), 20);
    assert_eq!(dirs.lookup_u64(dir, &name(1)).unwrap(), 1000);
    assert!(dirs.lookup_u64(dir, &name(2)).unwrap_err().is_not_found());
    assert_eq!(dirs.entries(dir).count(), 20);
}

#[test]
fn test_promoted_directory_reloads_after_eviction() {
    let dirs = small_engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    for i in 0..20 {
        dirs.add_u64(dir, &name(i), i, &tx).unwrap();
    }
    dirs.store().commit(tx).unwrap();

    // Force the handle to be rebuilt from the object bytes
    assert!(dirs.store().handles().evict(dir));
    assert_eq!(dirs.count(dir).unwrap(), 20);
    assert_eq!(dirs.lookup_u64(dir, &name(19)).unwrap(), 19);
}
