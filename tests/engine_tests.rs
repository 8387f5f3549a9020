use bson::{Bson, doc};
use burrowdb::{AutoId, BurrowEngine, EngineSettings, Error, Query};
use std::path::PathBuf;

fn temp_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    (dir, path)
}

fn open(path: &PathBuf) -> BurrowEngine {
    BurrowEngine::open(EngineSettings::new(path)).unwrap()
}

#[test]
fn insert_then_find_by_id() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    engine
        .insert(
            "docs",
            vec![doc! { "_id": 1, "name": "a" }],
            AutoId::ObjectId,
            100,
        )
        .unwrap();

    let found = engine
        .find("docs", &Query::eq("_id", 1), 0, None)
        .unwrap();
    assert_eq!(found, vec![doc! { "_id": 1, "name": "a" }]);
}

#[test]
fn data_survives_reopen() {
    let (_dir, path) = temp_db();

    {
        let engine = open(&path);
        let docs = (0..100)
            .map(|i| doc! { "_id": i, "value": i * 10 })
            .collect();
        engine.insert("docs", docs, AutoId::ObjectId, 10).unwrap();
        engine.close().unwrap();
    }

    let engine = open(&path);
    assert_eq!(engine.count("docs", &Query::all()).unwrap(), 100);

    let found = engine
        .find("docs", &Query::eq("_id", 42), 0, None)
        .unwrap();
    assert_eq!(found, vec![doc! { "_id": 42, "value": 420 }]);
}

#[test]
fn clean_close_removes_journal() {
    let (_dir, path) = temp_db();

    let engine = open(&path);
    engine
        .insert("docs", vec![doc! { "_id": 1 }], AutoId::ObjectId, 100)
        .unwrap();
    engine.close().unwrap();

    let journal = path.with_file_name("test.db-journal");
    assert!(!journal.exists());
}

#[test]
fn object_id_auto_ids_are_distinct() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    let docs = (0..50).map(|i| doc! { "n": i }).collect();
    engine.insert("docs", docs, AutoId::ObjectId, 100).unwrap();

    let mut ids: Vec<Bson> = engine
        .find("docs", &Query::all(), 0, None)
        .unwrap()
        .into_iter()
        .map(|doc| doc.get("_id").unwrap().clone())
        .collect();
    assert_eq!(ids.len(), 50);

    ids.sort_by_key(|id| format!("{id:?}"));
    ids.dedup();
    assert_eq!(ids.len(), 50, "auto-assigned _ids must be unique");
}

#[test]
fn int32_auto_id_counts_up() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    for expected in 1..=5 {
        engine
            .insert("docs", vec![doc! { "n": 0 }], AutoId::Int32, 100)
            .unwrap();
        assert_eq!(engine.max("docs", "_id").unwrap(), Some(Bson::Int32(expected)));
    }

    // explicit ids steer the sequence
    engine
        .insert("docs", vec![doc! { "_id": 100 }], AutoId::Int32, 100)
        .unwrap();
    engine
        .insert("docs", vec![doc! { "n": 0 }], AutoId::Int32, 100)
        .unwrap();
    assert_eq!(engine.max("docs", "_id").unwrap(), Some(Bson::Int32(101)));
}

#[test]
fn duplicate_id_rejected_and_state_unchanged() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    engine
        .insert("docs", vec![doc! { "_id": 7, "v": "first" }], AutoId::ObjectId, 100)
        .unwrap();

    let err = engine
        .insert("docs", vec![doc! { "_id": 7, "v": "second" }], AutoId::ObjectId, 100)
        .unwrap_err();
    assert!(matches!(err, Error::IndexDuplicateKey { .. }));

    assert_eq!(engine.count("docs", &Query::all()).unwrap(), 1);
    let found = engine.find("docs", &Query::eq("_id", 7), 0, None).unwrap();
    assert_eq!(found[0].get_str("v").unwrap(), "first");
}

#[test]
fn failing_buffer_rolls_back_alone() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    // ids 0..10, but the 8th duplicates an id from the first buffer
    let mut docs: Vec<bson::Document> = (0..10).map(|i| doc! { "_id": i }).collect();
    docs[7] = doc! { "_id": 2 };

    let err = engine.insert("docs", docs, AutoId::ObjectId, 5).unwrap_err();
    assert!(matches!(err, Error::IndexDuplicateKey { .. }));

    // first buffer of 5 committed; the failing second buffer did not
    assert_eq!(engine.count("docs", &Query::all()).unwrap(), 5);
}

#[test]
fn update_replaces_whole_document() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    engine
        .insert("docs", vec![doc! { "_id": 1, "a": 1, "b": 2 }], AutoId::ObjectId, 100)
        .unwrap();

    let updated = engine
        .update("docs", vec![doc! { "_id": 1, "c": 3 }], 100)
        .unwrap();
    assert_eq!(updated, 1);

    let found = engine.find("docs", &Query::eq("_id", 1), 0, None).unwrap();
    assert_eq!(found, vec![doc! { "_id": 1, "c": 3 }]);

    // unknown _id: nothing replaced
    let updated = engine
        .update("docs", vec![doc! { "_id": 9, "c": 3 }], 100)
        .unwrap();
    assert_eq!(updated, 0);
}

#[test]
fn update_grows_document_across_pages() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    engine
        .insert("docs", vec![doc! { "_id": 1, "payload": "small" }], AutoId::ObjectId, 100)
        .unwrap();

    // force relocation plus an extend chain
    let big = "x".repeat(20_000);
    engine
        .update("docs", vec![doc! { "_id": 1, "payload": big.as_str() }], 100)
        .unwrap();

    let found = engine.find("docs", &Query::eq("_id", 1), 0, None).unwrap();
    assert_eq!(found[0].get_str("payload").unwrap(), big);

    // and shrink it back
    engine
        .update("docs", vec![doc! { "_id": 1, "payload": "tiny" }], 100)
        .unwrap();
    let found = engine.find("docs", &Query::eq("_id", 1), 0, None).unwrap();
    assert_eq!(found[0].get_str("payload").unwrap(), "tiny");
}

#[test]
fn large_documents_roundtrip() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    let blob = vec![0xABu8; 50_000];
    engine
        .insert(
            "blobs",
            vec![doc! { "_id": 1, "data": bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: blob.clone(),
            }}],
            AutoId::ObjectId,
            100,
        )
        .unwrap();

    let found = engine.find("blobs", &Query::eq("_id", 1), 0, None).unwrap();
    let stored = match found[0].get("data").unwrap() {
        Bson::Binary(bin) => &bin.bytes,
        other => panic!("unexpected value {other:?}"),
    };
    assert_eq!(*stored, blob);
}

#[test]
fn deleted_pages_are_recycled() {
    let (_dir, path) = temp_db();

    let payload = "y".repeat(1000);

    {
        let engine = open(&path);
        let docs = (0..50).map(|i| doc! { "_id": i, "p": payload.as_str() }).collect();
        engine.insert("docs", docs, AutoId::ObjectId, 100).unwrap();
        engine.close().unwrap();
    }
    let size_after_first = std::fs::metadata(&path).unwrap().len();

    {
        let engine = open(&path);
        assert_eq!(engine.delete("docs", &Query::all()).unwrap(), 50);

        let docs = (0..50).map(|i| doc! { "_id": i, "p": payload.as_str() }).collect();
        engine.insert("docs", docs, AutoId::ObjectId, 100).unwrap();
        engine.close().unwrap();
    }
    let size_after_second = std::fs::metadata(&path).unwrap().len();

    // the second batch reuses freed pages instead of growing the file
    let slack = 8 * 4096;
    assert!(
        size_after_second <= size_after_first + slack,
        "file grew from {size_after_first} to {size_after_second}"
    );
}

#[test]
fn min_and_max() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    let docs = [30, 10, 50, 20].into_iter().map(|v| doc! { "v": v }).collect();
    engine.insert("docs", docs, AutoId::ObjectId, 100).unwrap();

    assert_eq!(engine.min("docs", "v").unwrap(), Some(Bson::Int32(10)));
    assert_eq!(engine.max("docs", "v").unwrap(), Some(Bson::Int32(50)));
    assert_eq!(engine.min("missing", "v").unwrap(), None);
}

#[test]
fn exists_and_count() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    let docs = (0..10).map(|i| doc! { "_id": i, "even": i % 2 == 0 }).collect();
    engine.insert("docs", docs, AutoId::ObjectId, 100).unwrap();

    assert!(engine.exists("docs", &Query::eq("even", true)).unwrap());
    assert!(!engine.exists("docs", &Query::eq("_id", 99)).unwrap());
    assert_eq!(engine.count("docs", &Query::eq("even", true)).unwrap(), 5);
    assert_eq!(engine.count("missing", &Query::all()).unwrap(), 0);
}

#[test]
fn drop_and_rename_collections() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    engine
        .insert("first", vec![doc! { "_id": 1 }], AutoId::ObjectId, 100)
        .unwrap();
    engine
        .insert("second", vec![doc! { "_id": 1 }], AutoId::ObjectId, 100)
        .unwrap();

    assert!(engine.rename_collection("first", "renamed").unwrap());
    let mut names = engine.get_collection_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["renamed", "second"]);

    assert_eq!(engine.count("renamed", &Query::all()).unwrap(), 1);

    assert!(engine.drop_collection("second").unwrap());
    assert!(!engine.drop_collection("second").unwrap());
    assert_eq!(engine.get_collection_names().unwrap(), vec!["renamed"]);
}

#[test]
fn ensure_and_drop_index() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    let docs = (0..20).map(|i| doc! { "_id": i, "v": i }).collect();
    engine.insert("docs", docs, AutoId::ObjectId, 100).unwrap();

    assert!(engine.ensure_index("docs", "v", false).unwrap());
    assert!(!engine.ensure_index("docs", "v", false).unwrap(), "already exists");

    assert!(engine.drop_index("docs", "v").unwrap());
    assert!(!engine.drop_index("docs", "v").unwrap());

    assert!(matches!(
        engine.drop_index("docs", "_id"),
        Err(Error::InvalidFormat(_))
    ));
}

#[test]
fn unique_secondary_index() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    engine
        .insert("users", vec![doc! { "_id": 1, "mail": "a@x" }], AutoId::ObjectId, 100)
        .unwrap();
    engine.ensure_index("users", "mail", true).unwrap();

    let err = engine
        .insert("users", vec![doc! { "_id": 2, "mail": "a@x" }], AutoId::ObjectId, 100)
        .unwrap_err();
    assert!(matches!(err, Error::IndexDuplicateKey { .. }));

    engine
        .insert("users", vec![doc! { "_id": 2, "mail": "b@x" }], AutoId::ObjectId, 100)
        .unwrap();
    assert_eq!(engine.count("users", &Query::all()).unwrap(), 2);
}

#[test]
fn nesting_depth_is_bounded() {
    let (_dir, path) = temp_db();
    let engine = open(&path);

    let mut value = Bson::Int32(0);
    for _ in 0..25 {
        value = Bson::Document(doc! { "inner": value });
    }

    let err = engine
        .insert("docs", vec![doc! { "_id": 1, "deep": value }], AutoId::ObjectId, 100)
        .unwrap_err();
    assert!(matches!(err, Error::DocumentMaxDepth(_)));
}

#[test]
fn read_only_engine_rejects_writes() {
    let (_dir, path) = temp_db();

    {
        let engine = open(&path);
        engine
            .insert("docs", vec![doc! { "_id": 1 }], AutoId::ObjectId, 100)
            .unwrap();
        engine.close().unwrap();
    }

    let mut settings = EngineSettings::new(&path);
    settings.read_only = true;
    let engine = BurrowEngine::open(settings).unwrap();

    assert_eq!(engine.count("docs", &Query::all()).unwrap(), 1);
    assert!(matches!(
        engine.insert("docs", vec![doc! { "_id": 2 }], AutoId::ObjectId, 100),
        Err(Error::ReadOnly)
    ));
}

#[test]
fn opening_garbage_fails() {
    let (_dir, path) = temp_db();
    std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

    assert!(BurrowEngine::open(EngineSettings::new(&path)).is_err());
}

#[test]
fn concurrent_readers_see_committed_counts() {
    use std::sync::Arc;

    let (_dir, path) = temp_db();
    let engine = Arc::new(open(&path));

    let writer = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            for i in 0..200 {
                engine
                    .insert("docs", vec![doc! { "_id": i }], AutoId::ObjectId, 100)
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..50 {
                    let count = engine.count("docs", &Query::all()).unwrap();
                    // counts only move forward and never exceed the writer
                    assert!(count >= last && count <= 200);
                    last = count;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(engine.count("docs", &Query::all()).unwrap(), 200);
}
