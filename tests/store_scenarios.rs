//! End-to-end scenarios driving the store through its public API.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use occstore::codec::{ResourceType, RowLayout};
use occstore::{StatisticsStore, StoreOptions};

fn open_store(dir: &std::path::Path, chunks: u16) -> StatisticsStore {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    StatisticsStore::open(StoreOptions::new(dir, chunks)).expect("open store")
}

#[test]
fn counts_subjects_properties_and_objects_per_chunk() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 2);

    for _ in 0..3 {
        store.increment_subject_count(7, 0).expect("increment");
    }
    store.increment_property_count(7, 1).expect("increment");

    assert_eq!(
        store.get_statistics_for_resource(7).expect("get"),
        vec![3, 0, 0, 1, 0, 0]
    );
    assert_eq!(store.max_id().expect("max id"), 8);
}

#[test]
fn untouched_resources_read_as_zero() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 3);
    store.increment_object_count(100, 2).expect("increment");

    assert_eq!(store.get_statistics_for_resource(50).expect("get"), vec![0; 9]);
    assert_eq!(store.get_statistics_for_resource(1000).expect("get"), vec![0; 9]);
    let mut expected = vec![0u64; 9];
    expected[8] = 1;
    assert_eq!(store.get_statistics_for_resource(100).expect("get"), expected);
}

#[test]
fn counters_widen_across_byte_boundaries() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 2);

    for i in 0..300u64 {
        store.increment_subject_count(1, 0).expect("increment");
        let stats = store.get_statistics_for_resource(1).expect("get");
        assert_eq!(stats[0], i + 1);
    }
    // A second column at a different width.
    store.increment_object_count(1, 1).expect("increment");
    assert_eq!(
        store.get_statistics_for_resource(1).expect("get"),
        vec![300, 0, 0, 0, 0, 1]
    );
}

#[test]
fn rows_spill_to_extra_files_and_survive_reopen() {
    let dir = tempdir().expect("temp dir");
    let layout = RowLayout::new(2).expect("layout");
    {
        let mut store = open_store(dir.path(), 2);
        // Four two-byte counters no longer fit beside the position bitmap
        // in the eight inline bytes.
        for column in [0usize, 1, 3, 5] {
            let (kind, chunk) = (column / 2, column % 2);
            for _ in 0..300 {
                match kind {
                    0 => store.increment_subject_count(9, chunk).expect("increment"),
                    1 => store.increment_property_count(9, chunk).expect("increment"),
                    _ => store.increment_object_count(9, chunk).expect("increment"),
                }
            }
        }
        assert_eq!(
            store.get_statistics_for_resource(9).expect("get"),
            vec![300, 300, 0, 300, 0, 300]
        );
        store.close().expect("close");
    }

    // The row landed in the extra file named after its shape id.
    let shape = occstore::codec::Shape {
        position_count: 4,
        bytes_per_value: 2,
    };
    assert!(layout.data_len(shape) > 8);
    let shape_file = dir.path().join(layout.shape_id(shape).to_string());
    assert!(shape_file.exists(), "expected extra file {shape_file:?}");

    let mut store = open_store(dir.path(), 2);
    assert_eq!(
        store.get_statistics_for_resource(9).expect("get"),
        vec![300, 300, 0, 300, 0, 300]
    );
}

#[test]
fn random_increments_match_reference_model() {
    for chunks in [1u16, 4, 40] {
        let dir = tempdir().expect("temp dir");
        let columns = 3 * chunks as usize;
        let mut model: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE + chunks as u64);

        {
            let mut store = open_store(dir.path(), chunks);
            for _ in 0..2_000 {
                let id = rng.gen_range(1..=20u64);
                let chunk = rng.gen_range(0..chunks as usize);
                let kind = rng.gen_range(0..3u8);
                match kind {
                    0 => store.increment_subject_count(id, chunk).expect("increment"),
                    1 => store.increment_property_count(id, chunk).expect("increment"),
                    _ => store.increment_object_count(id, chunk).expect("increment"),
                }
                let resource_type = match kind {
                    0 => ResourceType::Subject,
                    1 => ResourceType::Property,
                    _ => ResourceType::Object,
                };
                let column = resource_type as usize * chunks as usize + chunk;
                model.entry(id).or_insert_with(|| vec![0; columns])[column] += 1;
            }
            for (&id, expected) in &model {
                assert_eq!(
                    &store.get_statistics_for_resource(id).expect("get"),
                    expected,
                    "chunks={chunks} id={id} before flush"
                );
            }
            store.close().expect("close");
        }

        let mut store = open_store(dir.path(), chunks);
        for (&id, expected) in &model {
            assert_eq!(
                &store.get_statistics_for_resource(id).expect("get"),
                expected,
                "chunks={chunks} id={id} after reopen"
            );
        }
    }
}

#[test]
fn insert_entry_then_increment() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 2);
    store
        .insert_entry(4, &[9, 0, 0, 0, 0, 1_000_000])
        .expect("insert");
    store.increment_subject_count(4, 0).expect("increment");
    store.increment_property_count(4, 0).expect("increment");
    assert_eq!(
        store.get_statistics_for_resource(4).expect("get"),
        vec![10, 0, 1, 0, 0, 1_000_000]
    );
}

#[test]
fn chunk_sizes_and_statistics_reload_together() {
    let dir = tempdir().expect("temp dir");
    {
        let mut store = open_store(dir.path(), 3);
        store.increment_subject_count(2, 1).expect("increment");
        store.increment_number_of_triples_per_chunk(1).expect("increment");
        store.increment_number_of_triples_per_chunk(1).expect("increment");
        store.close().expect("close");
    }
    let mut store = open_store(dir.path(), 3);
    assert_eq!(store.get_chunk_sizes(), &[0, 2, 0]);
    let mut expected = vec![0u64; 9];
    expected[1] = 1;
    assert_eq!(store.get_statistics_for_resource(2).expect("get"), expected);
}

#[test]
fn sparse_ids_leave_gaps_in_the_index() {
    let dir = tempdir().expect("temp dir");
    let mut store = open_store(dir.path(), 1);
    store.increment_subject_count(3, 0).expect("increment");
    store.increment_subject_count(10, 0).expect("increment");

    assert_eq!(store.max_id().expect("max id"), 11);
    assert_eq!(store.get_statistics_for_resource(5).expect("get"), vec![0; 3]);
    assert_eq!(store.get_statistics_for_resource(10).expect("get"), vec![1, 0, 0]);
}
