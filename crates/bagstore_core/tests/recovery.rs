//! Rebuilding indexes from records gives what incremental maintenance built.

use bagstore_core::{
    Bag, BagConfig, BagServices, CoreError, DefaultIndexManager, Entity, EntityId,
    InMemoryMetadataStore, Key, KeyField, MetadataStore, UuidIdGenerator,
};
use bagstore_storage::InMemoryRecordStoreFactory;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Persist {
        id: u8,
        age: Option<i64>,
        tags: Vec<String>,
    },
    Remove {
        id: u8,
    },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (
            0u8..8,
            prop::option::of(0i64..5),
            prop::collection::vec("[a-c]", 0..3),
        )
            .prop_map(|(id, age, tags)| Op::Persist { id, age, tags }),
        1 => (0u8..8).prop_map(|id| Op::Remove { id }),
    ]
}

fn services(
    records: &Arc<InMemoryRecordStoreFactory>,
    metadata: Arc<InMemoryMetadataStore>,
) -> BagServices {
    BagServices {
        records: records.clone(),
        indexes: Arc::new(DefaultIndexManager::new("i", metadata.clone())),
        metadata,
        ids: Arc::new(UuidIdGenerator),
    }
}

fn declare_indexes(bag: &Bag) {
    bag.ensure_index(&[KeyField::long("age")], false, &[])
        .unwrap();
    bag.ensure_index(
        &[KeyField::text("tags", 4)],
        false,
        &[KeyField::long("age")],
    )
    .unwrap();
}

fn apply(bag: &Bag, op: &Op) {
    match op {
        Op::Persist { id, age, tags } => {
            let mut entity = Entity::with_id(EntityId::new(format!("e{id}")).unwrap());
            if let Some(age) = age {
                entity.set("age", *age);
            }
            if !tags.is_empty() {
                entity.set("tags", tags.clone());
            }
            bag.persist(entity).unwrap();
        }
        Op::Remove { id } => match bag.remove_by_id(&format!("e{id}")) {
            Ok(()) | Err(CoreError::EntityNotFound { .. }) => {}
            Err(e) => panic!("unexpected failure: {e}"),
        },
    }
}

fn contents(bag: &Bag) -> Vec<(String, Vec<Key>)> {
    bag.index_names()
        .unwrap()
        .into_iter()
        .map(|name| {
            let entries = bag.index(&name).unwrap().entries();
            (name, entries)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn rebuild_matches_incremental(ops in prop::collection::vec(op(), 1..40)) {
        let records = Arc::new(InMemoryRecordStoreFactory::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());

        let bag = Bag::open("i", "people", services(&records, metadata.clone()), &BagConfig::default()).unwrap();
        declare_indexes(&bag);
        for op in &ops {
            apply(&bag, op);
        }
        let incremental = contents(&bag);

        // Crash: the store object and in-memory indexes are lost, the
        // shutdown marker stays unclean.
        records.evict("i", "people");
        metadata.mark_shutdown(false).unwrap();
        let restarted = Arc::new(metadata.restart());

        let reopened = Bag::open("i", "people", services(&records, restarted), &BagConfig::default()).unwrap();
        prop_assert!(reopened.recovery_report().is_some());
        prop_assert_eq!(contents(&reopened), incremental);
    }

    #[test]
    fn insertion_order_does_not_matter(ages in prop::collection::vec(0i64..4, 1..12)) {
        let build = |order: Vec<usize>| {
            let records = Arc::new(InMemoryRecordStoreFactory::new());
            let metadata = Arc::new(InMemoryMetadataStore::new());
            let bag = Bag::open("i", "people", services(&records, metadata), &BagConfig::default()).unwrap();
            for i in order {
                bag.insert(Entity::with_id(EntityId::new(format!("e{i}")).unwrap()).with("age", ages[i]))
                    .unwrap();
            }
            declare_indexes(&bag);
            contents(&bag)
        };
        let forward: Vec<usize> = (0..ages.len()).collect();
        let backward: Vec<usize> = (0..ages.len()).rev().collect();
        prop_assert_eq!(build(forward), build(backward));
    }
}

#[test]
fn forced_rebuild_replaces_clean_contents() {
    let records = Arc::new(InMemoryRecordStoreFactory::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let services = services(&records, metadata);

    let bag = Bag::open("i", "people", services.clone(), &BagConfig::default()).unwrap();
    declare_indexes(&bag);
    bag.insert(Entity::with_id(EntityId::new("e1").unwrap()).with("age", 7))
        .unwrap();
    let before = contents(&bag);
    bag.close().unwrap();

    let config = BagConfig::default().force_rebuild(true).rebuild_workers(4);
    let bag = Bag::open("i", "people", services, &config).unwrap();
    assert!(bag.recovery_report().is_some());
    assert_eq!(contents(&bag), before);
}

#[test]
fn unparseable_record_fails_open() {
    let records = Arc::new(InMemoryRecordStoreFactory::new());
    let metadata = Arc::new(InMemoryMetadataStore::with_last_shutdown(false));
    {
        use bagstore_storage::RecordStoreFactory;
        records
            .load("i", "people")
            .unwrap()
            .insert_record("junk", b"\xff\x00garbage")
            .unwrap();
    }
    let err = Bag::open("i", "people", services(&records, metadata), &BagConfig::default())
        .unwrap_err();
    assert_eq!(err.kind(), bagstore_core::ErrorKind::FatalInitialization);
}
