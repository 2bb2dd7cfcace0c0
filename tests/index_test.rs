//! Integration tests for the OID index and attribute indexes

use objdb::common::{DatabaseConfig, EntryWidth, ObjDbError, Oid, PageId, Position, FIRST_OID};
use objdb::index::key_encoding::decode_f64;
use objdb::txn::{Database, TxState};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::NamedTempFile;

fn create(temp_file: &NamedTempFile) -> Database {
    Database::create(temp_file.path(), DatabaseConfig::default().with_page_size(256)).unwrap()
}

fn reopen(temp_file: &NamedTempFile) -> Database {
    Database::open(temp_file.path(), DatabaseConfig::default()).unwrap()
}

#[test]
fn test_append_with_interleaved_reuse() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    // objects are appended in order while older ones die and get rewritten
    let mut live = Vec::new();
    for round in 0..20u32 {
        let mut tx = db.begin();
        let range = tx.allocate_oids(50).unwrap();
        for oid in range.iter() {
            tx.add_oid(oid, Position::new(PageId::new(round), oid.as_u64() as u32)).unwrap();
            live.push(oid);
        }
        let dead: Vec<Oid> = live.iter().copied().skip(round as usize * 7).step_by(5).take(10).collect();
        for oid in &dead {
            tx.remove_oid(*oid).unwrap();
        }
        live.retain(|oid| !dead.contains(oid));
        tx.commit().unwrap();
    }

    let mut db = {
        drop(db);
        reopen(&temp_file)
    };
    let mut tx = db.begin();
    let found: Vec<Oid> = tx
        .iter_oids(Oid::new(FIRST_OID), Oid::new(u32::MAX as u64))
        .unwrap()
        .into_iter()
        .map(|(oid, _)| oid)
        .collect();
    assert_eq!(found, live);
    tx.rollback();

    let stats = db.statistics().unwrap();
    assert_eq!(stats.oid_index.entries, live.len());
    assert_eq!(stats.last_oid, FIRST_OID + 999);
}

#[test]
fn test_oid_counter_survives_rollback_and_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let mut tx = db.begin();
    let first = tx.allocate_oids(3).unwrap();
    tx.commit().unwrap();
    assert_eq!(first.start, Oid::new(FIRST_OID));

    let mut tx = db.begin();
    tx.allocate_oids(1000).unwrap();
    tx.rollback();

    drop(db);
    let mut db = reopen(&temp_file);
    let mut tx = db.begin();
    assert_eq!(tx.allocate_oids(1).unwrap().start, Oid::new(FIRST_OID + 3));
}

#[test]
fn test_unique_index_through_transactions() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let mut tx = db.begin();
    let oids: Vec<Oid> = tx.allocate_oids(3).unwrap().iter().collect();
    let by_name = tx.create_index("person.name", true, EntryWidth::Long).unwrap();
    tx.index_insert(by_name, "ada", oids[0]).unwrap();
    tx.index_insert(by_name, "grace", oids[1]).unwrap();

    // a violation is reported but leaves the transaction usable
    let err = tx.index_insert(by_name, "ada", oids[2]).unwrap_err();
    assert!(matches!(err, ObjDbError::ConstraintViolation { existing, rejected, .. }
        if existing == oids[0] && rejected == oids[2]));
    assert_eq!(tx.state(), TxState::Active);

    // reinserting the same pair is allowed
    tx.index_insert(by_name, "ada", oids[0]).unwrap();
    tx.index_insert(by_name, "edsger", oids[2]).unwrap();
    tx.commit().unwrap();

    drop(db);
    let mut db = reopen(&temp_file);
    assert_eq!(db.index_names(), vec!["person.name".to_string()]);

    let mut snapshot = db.snapshot().unwrap();
    assert_eq!(snapshot.lookup("person.name", "ada").unwrap(), vec![oids[0]]);
    assert_eq!(snapshot.lookup("person.name", "edsger").unwrap(), vec![oids[2]]);
    assert!(snapshot.lookup("person.name", "barbara").unwrap().is_empty());
    assert!(matches!(
        snapshot.lookup("person.age", &42i32),
        Err(ObjDbError::IndexNameNotFound(_))
    ));
}

#[test]
fn test_non_unique_index_with_many_duplicates() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let mut tx = db.begin();
    let by_age = tx.create_index("person.age", false, EntryWidth::Int).unwrap();
    let oids: Vec<Oid> = tx.allocate_oids(600).unwrap().iter().collect();
    let mut rng = StdRng::seed_from_u64(7);
    let mut shuffled = oids.clone();
    shuffled.shuffle(&mut rng);
    for oid in &shuffled {
        let age = (oid.as_u64() % 6) as i32 + 20;
        tx.index_insert(by_age, &age, *oid).unwrap();
    }
    tx.commit().unwrap();

    let mut tx = db.begin();
    let by_age = tx.index_id("person.age").unwrap();
    let mut aged_20 = tx.index_lookup(by_age, &20i32).unwrap();
    aged_20.sort();
    let expected: Vec<Oid> = oids.iter().copied().filter(|oid| oid.as_u64() % 6 == 0).collect();
    assert_eq!(aged_20, expected);

    for oid in expected.iter().take(50) {
        assert!(tx.index_remove(by_age, &20i32, *oid).unwrap());
    }
    assert!(!tx.index_remove(by_age, &20i32, expected[0]).unwrap());
    tx.commit().unwrap();

    let mut snapshot = db.snapshot().unwrap();
    assert_eq!(snapshot.lookup("person.age", &20i32).unwrap().len(), expected.len() - 50);

    let keys: Vec<i64> = snapshot
        .range("person.age", &21i32, &22i32)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys.len(), 200);
    assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_range_over_double_keys() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let values = [3.5f64, -0.25, 1e10, -7.0, 0.0, 2.75, -1e-3];
    let mut tx = db.begin();
    let by_score = tx.create_index("game.score", true, EntryWidth::Long).unwrap();
    let oids: Vec<Oid> = tx.allocate_oids(values.len() as u64).unwrap().iter().collect();
    for (value, oid) in values.iter().zip(&oids) {
        tx.index_insert(by_score, value, *oid).unwrap();
    }
    tx.commit().unwrap();

    let mut snapshot = db.snapshot().unwrap();
    let scores: Vec<f64> = snapshot
        .range("game.score", &-1.0f64, &3.5f64)
        .unwrap()
        .map(|entry| decode_f64(entry.unwrap().0))
        .collect();
    assert_eq!(scores, vec![-0.25, -1e-3, 0.0, 2.75, 3.5]);
}

#[test]
fn test_drop_index_frees_its_pages() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let mut tx = db.begin();
    let by_id = tx.create_index("item.code", true, EntryWidth::Long).unwrap();
    let oids: Vec<Oid> = tx.allocate_oids(300).unwrap().iter().collect();
    for (code, oid) in oids.iter().enumerate() {
        tx.index_insert(by_id, &(code as i64 * 3), *oid).unwrap();
    }
    tx.commit().unwrap();

    let stats = db.statistics().unwrap();
    let index_pages = stats.attribute_indexes[0].1.leaf_pages + stats.attribute_indexes[0].1.inner_pages;
    let free_before = stats.free_pages;

    let mut tx = db.begin();
    assert!(matches!(
        tx.create_index("item.code", false, EntryWidth::Int),
        Err(ObjDbError::IndexAlreadyExists(_))
    ));
    tx.drop_index("item.code").unwrap();
    assert!(matches!(
        tx.drop_index("item.code"),
        Err(ObjDbError::IndexNameNotFound(_))
    ));
    tx.commit().unwrap();

    assert!(db.index_names().is_empty());
    // the free list itself may need one more page
    assert!(db.statistics().unwrap().free_pages >= free_before + index_pages - 1);

    drop(db);
    let db = reopen(&temp_file);
    assert!(db.index_names().is_empty());
}

#[test]
fn test_index_ids_are_not_reused() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let mut tx = db.begin();
    let first = tx.create_index("a", true, EntryWidth::Long).unwrap();
    tx.commit().unwrap();

    let mut tx = db.begin();
    tx.drop_index("a").unwrap();
    let second = tx.create_index("a", true, EntryWidth::Long).unwrap();
    tx.commit().unwrap();
    assert_ne!(first, second);

    drop(db);
    let mut db = reopen(&temp_file);
    let mut tx = db.begin();
    let third = tx.create_index("b", false, EntryWidth::Int).unwrap();
    assert!(third.as_u32() > second.as_u32());
}

#[test]
fn test_narrow_index_rejects_wide_keys() {
    let temp_file = NamedTempFile::new().unwrap();
    let mut db = create(&temp_file);

    let mut tx = db.begin();
    let oid = tx.allocate_oids(1).unwrap().start;
    let flags = tx.create_index("item.flag", false, EntryWidth::Int).unwrap();
    tx.index_insert(flags, &true, oid).unwrap();

    let err = tx.index_insert(flags, &(1i64 << 40), oid).unwrap_err();
    assert!(matches!(err, ObjDbError::ValueOutOfRange { .. }));
    assert_eq!(tx.state(), TxState::Active);
    assert_eq!(tx.index_lookup(flags, &true).unwrap(), vec![oid]);
}
