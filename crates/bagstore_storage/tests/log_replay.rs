//! Replaying a record log reproduces the state the writes produced.

use bagstore_storage::{InMemoryBackend, LogRecordStore, RecordStore};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Write {
    Put(u8, Vec<u8>),
    Remove(u8),
}

fn write() -> impl Strategy<Value = Write> {
    prop_oneof![
        3 => (0u8..6, prop::collection::vec(any::<u8>(), 0..24))
            .prop_map(|(key, data)| Write::Put(key, data)),
        1 => (0u8..6).prop_map(Write::Remove),
    ]
}

fn contents(store: &LogRecordStore) -> BTreeMap<String, Vec<u8>> {
    store
        .read_all_records()
        .unwrap()
        .map(|record| (record.key, record.data))
        .collect()
}

proptest! {
    #[test]
    fn reopen_matches_model(writes in prop::collection::vec(write(), 0..48)) {
        let backend = InMemoryBackend::new();
        let store = LogRecordStore::open(Box::new(backend.clone())).unwrap();
        let mut model = BTreeMap::new();

        for w in &writes {
            match w {
                Write::Put(key, data) => {
                    let key = format!("k{key}");
                    if model.contains_key(&key) {
                        store.update_record(&key, data).unwrap();
                    } else {
                        store.insert_record(&key, data).unwrap();
                    }
                    model.insert(key, data.clone());
                }
                Write::Remove(key) => {
                    let key = format!("k{key}");
                    prop_assert_eq!(store.remove_record(&key).unwrap(), model.remove(&key).is_some());
                }
            }
        }
        prop_assert_eq!(&contents(&store), &model);

        let reopened = LogRecordStore::open(Box::new(backend)).unwrap();
        prop_assert_eq!(reopened.size().unwrap(), model.len() as u64);
        prop_assert_eq!(contents(&reopened), model);
    }

    #[test]
    fn torn_tail_is_cut_off(cut in 1usize..12) {
        let backend = InMemoryBackend::new();
        {
            let store = LogRecordStore::open(Box::new(backend.clone())).unwrap();
            store.insert_record("k1", b"first").unwrap();
            store.insert_record("k2", b"second").unwrap();
        }
        let full = backend.snapshot();
        let torn = InMemoryBackend::with_data(full[..full.len() - cut].to_vec());

        let reopened = LogRecordStore::open(Box::new(torn)).unwrap();
        prop_assert_eq!(reopened.read_record("k1").unwrap(), Some(b"first".to_vec()));
        prop_assert_eq!(reopened.read_record("k2").unwrap(), None);
    }
}

#[test]
fn zero_filled_tail_is_cut_off() {
    let backend = InMemoryBackend::new();
    {
        let store = LogRecordStore::open(Box::new(backend.clone())).unwrap();
        store.insert_record("k1", b"first").unwrap();
    }
    let written = backend.snapshot().len();
    let mut padded = backend.snapshot();
    padded.resize(written + 512, 0);
    let padded = InMemoryBackend::with_data(padded);

    let reopened = LogRecordStore::open(Box::new(padded.clone())).unwrap();
    assert_eq!(padded.snapshot().len(), written);
    assert_eq!(reopened.read_record("k1").unwrap(), Some(b"first".to_vec()));

    reopened.insert_record("k2", b"second").unwrap();
    drop(reopened);
    let again = LogRecordStore::open(Box::new(padded)).unwrap();
    assert_eq!(again.size().unwrap(), 2);
}
