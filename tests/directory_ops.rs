//! Basic directory operations through the public API

use std::sync::Arc;
use zap_rs::{
    Crc64Hasher, DirFormat, MemStore, NameHasher, ObjectStore, ZapBuilder, ZapConfig, ZapDirs,
    ZapError,
};

/// Sends every name starting with "dup" to one hash bucket
struct PrefixCollider;

impl NameHasher for PrefixCollider {
    fn hash(&self, salt: u64, name: &[u8]) -> u64 {
        if name.starts_with(b"dup") {
            0x5555_5555_0000_0000
        } else {
            Crc64Hasher.hash(salt, name)
        }
    }
}

fn engine() -> ZapDirs<MemStore> {
    ZapBuilder::new().build().unwrap()
}

#[test]
fn test_alice_and_bob() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    dirs.add_u64(dir, "alice", 42, &tx).unwrap();
    dirs.add_u64(dir, "bob", 7, &tx).unwrap();
    assert_eq!(dirs.count(dir).unwrap(), 2);
    assert_eq!(dirs.lookup_u64(dir, "alice").unwrap(), 42);

    dirs.remove(dir, "alice", &tx).unwrap();
    assert_eq!(dirs.count(dir).unwrap(), 1);
    assert!(matches!(
        dirs.lookup_u64(dir, "alice"),
        Err(ZapError::NotFound(_))
    ));
    assert_eq!(dirs.lookup_u64(dir, "bob").unwrap(), 7);
    dirs.store().commit(tx).unwrap();
}

#[test]
fn test_duplicate_add_leaves_entry_untouched() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    dirs.add_u64(dir, "name", 1, &tx).unwrap();
    assert!(matches!(
        dirs.add_u64(dir, "name", 2, &tx),
        Err(ZapError::AlreadyExists(_))
    ));
    assert_eq!(dirs.lookup_u64(dir, "name").unwrap(), 1);
    assert_eq!(dirs.count(dir).unwrap(), 1);
}

#[test]
fn test_remove_missing_is_not_found() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    assert!(dirs.remove(dir, "ghost", &tx).unwrap_err().is_not_found());
}

#[test]
fn test_colliding_names_coexist() {
    let config = ZapConfig::default();
    let store = Arc::new(MemStore::new(&config));
    let dirs = ZapDirs::with_hasher(store, config, Arc::new(PrefixCollider)).unwrap();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    dirs.add_u64(dir, "dup-a", 10, &tx).unwrap();
    dirs.add_u64(dir, "dup-b", 20, &tx).unwrap();
    dirs.add_u64(dir, "dup-c", 30, &tx).unwrap();
    assert_eq!(dirs.lookup_u64(dir, "dup-a").unwrap(), 10);
    assert_eq!(dirs.lookup_u64(dir, "dup-b").unwrap(), 20);
    assert_eq!(dirs.lookup_u64(dir, "dup-c").unwrap(), 30);

    // Removing the middle one keeps the others reachable
    dirs.remove(dir, "dup-b", &tx).unwrap();
    assert_eq!(dirs.lookup_u64(dir, "dup-c").unwrap(), 30);
    dirs.add_u64(dir, "dup-d", 40, &tx).unwrap();
    assert_eq!(dirs.lookup_u64(dir, "dup-d").unwrap(), 40);
    assert_eq!(dirs.count(dir).unwrap(), 3);
}

#[test]
fn test_directories_are_independent() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let a = dirs.create(&tx).unwrap();
    let b = dirs.create(&tx).unwrap();

    dirs.add_u64(a, "shared", 1, &tx).unwrap();
    dirs.add_u64(b, "shared", 2, &tx).unwrap();
    assert_eq!(dirs.lookup_u64(a, "shared").unwrap(), 1);
    assert_eq!(dirs.lookup_u64(b, "shared").unwrap(), 2);

    // Salts differ per directory
    assert_ne!(dirs.stats(a).unwrap().salt, dirs.stats(b).unwrap().salt);
}

#[test]
fn test_create_claim_and_destroy() {
    let dirs = engine();
    let tx = dirs.store().begin();
    dirs.create_claim(500, &tx).unwrap();
    dirs.add_u64(500, "x", 1, &tx).unwrap();
    assert!(matches!(
        dirs.create_claim(500, &tx),
        Err(ZapError::ObjectExists(500))
    ));

    dirs.destroy(500, &tx).unwrap();
    assert!(dirs.store().handles().get(500).is_none());
    assert!(matches!(dirs.count(500), Err(ZapError::NoSuchObject(500))));
}

#[test]
fn test_update_and_lengths() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    dirs.update_u64(dir, "counter", 1, &tx).unwrap();
    dirs.update_u64(dir, "counter", 2, &tx).unwrap();
    assert_eq!(dirs.lookup_u64(dir, "counter").unwrap(), 2);
    assert_eq!(dirs.length(dir, "counter").unwrap(), (8, 1));
    assert!(dirs.contains(dir, "counter").unwrap());
    assert!(!dirs.contains(dir, "other").unwrap());
    assert_eq!(dirs.stats(dir).unwrap().format, DirFormat::Micro);
}

#[test]
fn test_join_copies_entries() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let from = dirs.create(&tx).unwrap();
    let into = dirs.create(&tx).unwrap();

    for i in 0..5u64 {
        dirs.add_u64(from, &format!("f{}", i), i, &tx).unwrap();
    }
    dirs.add_u64(into, "existing", 99, &tx).unwrap();

    assert_eq!(dirs.join(from, into, &tx).unwrap(), 5);
    assert_eq!(dirs.count(into).unwrap(), 6);
    assert_eq!(dirs.lookup_u64(into, "f3").unwrap(), 3);

    // Joining again collides on every name
    assert!(matches!(
        dirs.join(from, into, &tx),
        Err(ZapError::AlreadyExists(_))
    ));
}

#[test]
fn test_handles_are_shared_across_opens() {
    let dirs = engine();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();

    let first = dirs.open(dir).unwrap();
    let second = dirs.open(dir).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
