//! Off-heap store behavior: single-threaded semantics, memory
//! accounting, and concurrent access across index variants.

use std::sync::Arc;
use std::thread;

use rawmap::codec::{BytesCodec, I64Codec, SerdeCodec, StringCodec};
use rawmap::{Error, IndexKind, OffHeapConfig, RawMap};

fn long_store(kind: IndexKind, max_memory: u64) -> RawMap<i64, i64> {
    RawMap::off_heap(
        OffHeapConfig {
            max_memory,
            index: kind,
            initial_capacity: 16,
        },
        I64Codec,
        I64Codec,
    )
    .unwrap()
}

const INT_KINDS: [IndexKind; 3] = [
    IndexKind::Hash,
    IndexKind::Segmented { segments: 64 },
    IndexKind::IntPrim,
];

#[test]
fn basic_long_to_long_semantics() {
    for kind in [IndexKind::Hash, IndexKind::Segmented { segments: 64 }, IndexKind::LongPrim] {
        let map = long_store(kind, 1 << 20);
        assert_eq!(map.put(1, &100).unwrap(), None);
        assert_eq!(map.put(2, &200).unwrap(), None);
        assert_eq!(map.put(1, &150).unwrap(), Some(100));
        assert_eq!(map.get(&1).unwrap(), Some(150));
        assert_eq!(map.get(&2).unwrap(), Some(200));
        assert_eq!(map.get(&3).unwrap(), None);
        assert_eq!(map.remove(&2).unwrap(), Some(200));
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&2).unwrap());
        map.close().unwrap();
    }
}

#[test]
fn size_tracks_net_puts_minus_removes() {
    for kind in INT_KINDS {
        let map: RawMap<i32, i64> = RawMap::off_heap(
            OffHeapConfig {
                index: kind,
                ..OffHeapConfig::default()
            },
            rawmap::codec::I32Codec,
            I64Codec,
        )
        .unwrap();
        assert!(map.is_empty());
        for k in 1..=50 {
            map.put(k, &i64::from(k)).unwrap();
        }
        assert_eq!(map.len(), 50);
        for k in 1..=50 {
            map.put(k, &i64::from(k * 2)).unwrap(); // updates don't change size
        }
        assert_eq!(map.len(), 50);
        for k in 1..=20 {
            map.remove(&k).unwrap();
        }
        assert_eq!(map.len(), 30);
        assert!(!map.is_empty());
        map.clear().unwrap();
        assert!(map.is_empty());
        map.close().unwrap();
    }
}

#[test]
fn string_round_trip_with_segmented_index() {
    let map: RawMap<String, String> = RawMap::off_heap(
        OffHeapConfig {
            index: IndexKind::Segmented { segments: 64 },
            ..OffHeapConfig::default()
        },
        StringCodec,
        StringCodec,
    )
    .unwrap();
    assert_eq!(map.put("hello".into(), &"world".into()).unwrap(), None);
    assert_eq!(
        map.put("hello".into(), &"HELLO".into()).unwrap(),
        Some("world".into())
    );
    assert_eq!(map.get(&"hello".into()).unwrap(), Some("HELLO".into()));
    assert_eq!(map.len(), 1);
    assert_eq!(map.remove(&"missing".into()).unwrap(), None);
    map.close().unwrap();
}

#[test]
fn variable_length_values_cross_size_classes() {
    let map: RawMap<i64, Vec<u8>> = RawMap::off_heap(
        OffHeapConfig::default(),
        I64Codec,
        BytesCodec,
    )
    .unwrap();
    // spans every slab class and the oversize path
    for (k, len) in [(1i64, 0usize), (2, 10), (3, 60), (4, 250), (5, 1020), (6, 4090), (7, 16380), (8, 100_000)] {
        let value = vec![(k as u8).wrapping_mul(3); len];
        map.put(k, &value).unwrap();
    }
    for (k, len) in [(1i64, 0usize), (2, 10), (3, 60), (4, 250), (5, 1020), (6, 4090), (7, 16380), (8, 100_000)] {
        let got = map.get(&k).unwrap().unwrap();
        assert_eq!(got.len(), len);
        assert!(got.iter().all(|&b| b == (k as u8).wrapping_mul(3)));
    }
    // shrinking an entry releases the larger block
    let used_before = map.stats().used_bytes;
    map.put(8, &vec![1u8; 4]).unwrap();
    assert!(map.stats().used_bytes < used_before);
    map.close().unwrap();
}

#[test]
fn clear_restores_allocator_baseline() {
    let map = long_store(IndexKind::Segmented { segments: 16 }, 1 << 22);
    let baseline = map.stats().used_bytes;
    assert_eq!(baseline, 0);
    for k in 1..=500 {
        map.put(k, &(k * 7)).unwrap();
    }
    assert!(map.stats().used_bytes > 0);
    map.clear().unwrap();
    assert_eq!(map.stats().used_bytes, 0);
    map.close().unwrap();
}

#[test]
fn serde_codec_stores_structured_values() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug, Clone)]
    struct Reading {
        sensor: String,
        samples: Vec<f32>,
    }

    let map: RawMap<i64, Reading> = RawMap::off_heap(
        OffHeapConfig {
            index: IndexKind::LongPrim,
            ..OffHeapConfig::default()
        },
        I64Codec,
        SerdeCodec::new(),
    )
    .unwrap();
    let reading = Reading {
        sensor: "thermo-1".into(),
        samples: vec![20.5, 21.0, 19.75],
    };
    map.put(9, &reading).unwrap();
    assert_eq!(map.get(&9).unwrap(), Some(reading.clone()));
    assert_eq!(map.remove(&9).unwrap(), Some(reading));
    map.close().unwrap();
}

#[test]
fn concurrent_updates_of_one_key_keep_a_single_entry() {
    for kind in [IndexKind::Hash, IndexKind::Segmented { segments: 64 }, IndexKind::LongPrim] {
        let map = Arc::new(long_store(kind, 1 << 22));
        let threads = 16i64;
        let updates = 1_000i64;
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..updates {
                        map.put(1, &(t * updates + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 1);
        let value = map.get(&1).unwrap().unwrap();
        assert!((0..threads * updates).contains(&value));
        map.close().unwrap();
    }
}

#[test]
fn disjoint_key_ranges_see_their_own_writes() {
    let map = Arc::new(long_store(IndexKind::Segmented { segments: 64 }, 1 << 24));
    let threads = 10i64;
    let per_thread = 500i64;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 1..=per_thread {
                    let key = t * per_thread + i;
                    map.put(key, &(key * 1000)).unwrap();
                }
                for i in 1..=per_thread {
                    let key = t * per_thread + i;
                    assert_eq!(map.get(&key).unwrap(), Some(key * 1000));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(map.len(), (threads * per_thread) as usize);
    map.close().unwrap();
}

#[test]
fn concurrent_readers_during_writes_never_tear() {
    let map = Arc::new(long_store(IndexKind::LongPrim, 1 << 22));
    map.put(7, &0).unwrap();
    let writer = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            for i in 1..=5_000i64 {
                map.put(7, &(i * 11)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let v = map.get(&7).unwrap().unwrap();
                    assert!(v == 0 || v % 11 == 0);
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(map.len(), 1);
    map.close().unwrap();
}

#[test]
fn randomized_churn_matches_a_reference_map() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE);
    let map = long_store(IndexKind::LongPrim, 1 << 22);
    let mut model = std::collections::HashMap::new();
    for _ in 0..5_000 {
        let key = rng.gen_range(1..=500i64);
        if rng.gen_bool(0.3) {
            assert_eq!(map.remove(&key).unwrap(), model.remove(&key));
        } else {
            let value = rng.gen::<i64>();
            assert_eq!(map.put(key, &value).unwrap(), model.insert(key, value));
        }
    }
    assert_eq!(map.len(), model.len());
    for (k, v) in &model {
        assert_eq!(map.get(k).unwrap(), Some(*v));
    }
    map.close().unwrap();
}

#[test]
fn primitive_sentinels_fail_with_invalid_key() {
    let map = long_store(IndexKind::LongPrim, 1 << 20);
    assert!(matches!(map.put(0, &1), Err(Error::InvalidKey(_))));
    assert!(matches!(map.put(i64::MIN, &1), Err(Error::InvalidKey(_))));
    assert_eq!(map.len(), 0);
    map.close().unwrap();
}
