// Property tests: selector resolution and read-your-writes against a model

mod common;

use bytes::Bytes;
use fluxkv_core::{GetRangeLimits, KeyRange, KeySelector, MutationType, key_after};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn sorted_keys(raw: BTreeSet<Vec<u8>>) -> Vec<Bytes> {
    raw.into_iter().map(Bytes::from).collect()
}

/// Direct reading of the selector definition: the last key satisfying the
/// comparison, then `offset - 1` steps forward.
fn resolve_naive(selector: &KeySelector, keys: &[Bytes], past_end: &Bytes) -> Bytes {
    let satisfying = keys
        .iter()
        .filter(|k| {
            if selector.or_equal() {
                k.as_ref() <= selector.key().as_ref()
            } else {
                k.as_ref() < selector.key().as_ref()
            }
        })
        .count() as i64;
    let index = satisfying - 1 + i64::from(selector.offset());
    if index < 0 {
        Bytes::new()
    } else {
        keys.get(index as usize).cloned().unwrap_or_else(|| past_end.clone())
    }
}

proptest! {
    #[test]
    fn selector_resolution_matches_definition(
        raw in prop::collection::btree_set(prop::collection::vec(0u8..4, 1..3), 0..12),
        anchor in prop::collection::vec(0u8..4, 0..3),
        or_equal in any::<bool>(),
        offset in -4i32..6,
    ) {
        let keys = sorted_keys(raw);
        let past_end = Bytes::from_static(b"\xff");
        let selector = KeySelector::new(anchor, or_equal, offset);
        let resolved = selector.resolve_within(&keys, &past_end);
        prop_assert_eq!(&resolved, &resolve_naive(&selector, &keys, &past_end));

        // Stepping a selector forward never moves it backwards.
        let stepped = (selector + 1).resolve_within(&keys, &past_end);
        prop_assert!(stepped >= resolved);
    }

    #[test]
    fn key_after_is_the_immediate_successor(key in prop::collection::vec(any::<u8>(), 0..8)) {
        let next = key_after(&key);
        prop_assert!(next.as_ref() > key.as_slice());
        let range = KeyRange::new(Bytes::from(key.clone()), next).unwrap();
        prop_assert!(range.contains(&key));
    }
}

#[derive(Debug, Clone)]
enum Op {
    Set(u8, u8),
    Clear(u8),
    ClearRange(u8, u8),
    Add(u8, u8),
}

fn key(slot: u8) -> Vec<u8> {
    vec![b'k', b'a' + slot]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0u8..8).prop_map(Op::Clear),
        (0u8..8, 0u8..8).prop_map(|(a, b)| Op::ClearRange(a.min(b), a.max(b))),
        (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Add(k, v)),
    ]
}

fn apply_model(model: &mut BTreeMap<Vec<u8>, Vec<u8>>, op: &Op) {
    match *op {
        Op::Set(k, v) => {
            model.insert(key(k), vec![v]);
        }
        Op::Clear(k) => {
            model.remove(&key(k));
        }
        Op::ClearRange(a, b) => {
            model.retain(|k, _| !(k.as_slice() >= key(a).as_slice() && k.as_slice() < key(b).as_slice()));
        }
        Op::Add(k, v) => {
            let current = model.get(&key(k)).and_then(|old| old.first().copied()).unwrap_or(0);
            model.insert(key(k), vec![current.wrapping_add(v)]);
        }
    }
}

fn as_pairs(kvs: &fluxkv_core::RangeResult) -> Vec<(Vec<u8>, Vec<u8>)> {
    kvs.kvs.iter().map(|kv| (kv.key.to_vec(), kv.value.to_vec())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn buffered_writes_match_model(
        seed in prop::collection::vec((0u8..8, any::<u8>()), 0..6),
        ops in prop::collection::vec(op_strategy(), 1..20),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fx = common::start().unwrap();
            let mut model = BTreeMap::new();

            let mut tx = fx.db.create_transaction().unwrap();
            for &(k, v) in &seed {
                tx.set(&key(k), &[v]).unwrap();
                apply_model(&mut model, &Op::Set(k, v));
            }
            tx.commit().unwrap().await.unwrap();

            let mut tx = fx.db.create_transaction().unwrap();
            for op in &ops {
                match *op {
                    Op::Set(k, v) => tx.set(&key(k), &[v]).unwrap(),
                    Op::Clear(k) => tx.clear(&key(k)).unwrap(),
                    Op::ClearRange(a, b) => tx.clear_range(&KeyRange::new(key(a), key(b)).unwrap()).unwrap(),
                    Op::Add(k, v) => tx.atomic_op(&key(k), &[v], MutationType::Add).unwrap(),
                }
                apply_model(&mut model, op);
            }
            let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();

            let buffered = tx
                .get_range_of(&KeyRange::all(), GetRangeLimits::unlimited(), false)
                .unwrap()
                .await
                .unwrap();
            prop_assert_eq!(&as_pairs(&buffered), &expected);
            tx.commit().unwrap().await.unwrap();

            let mut reader = fx.db.create_transaction().unwrap();
            let committed = reader
                .get_range_of(&KeyRange::all(), GetRangeLimits::unlimited(), false)
                .unwrap()
                .await
                .unwrap();
            prop_assert_eq!(&as_pairs(&committed), &expected);
            Ok(())
        })?;
    }
}
