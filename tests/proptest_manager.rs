//! Property tests over arbitrary operation sequences against the manager.
//!
//! After any sequence of successful operations:
//! - every upserted-and-not-removed doc_id gets back its last payload
//! - removed doc_ids are gone from `get` and `search`
//! - `search` returns at most k results, sorted by descending score, each
//!   hydratable through `get`
//! - `remove` and re-`upsert` outcomes follow the documented state machine

use docvec::{IndexConfig, RemoveOutcome, UpsertOutcome, VectorIndex};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug)]
enum Op {
    Upsert(u8, Vec<f32>),
    Remove(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..12, prop::collection::vec(-10.0f32..10.0, 3)).prop_filter_map(
            "zero-norm vectors are rejected by the index",
            |(id, v)| {
                if v.iter().map(|x| x * x).sum::<f32>() > 1e-6 {
                    Some(Op::Upsert(id, v))
                } else {
                    None
                }
            }
        ),
        1 => (0u8..12).prop_map(Op::Remove),
    ]
}

fn open_index() -> VectorIndex {
    let mut config = IndexConfig::new(3, "/tmp/docvec-proptest");
    config.m = 4;
    config.ef_construction = 16;
    config.ef_search = 32;
    VectorIndex::open(config).unwrap()
}

fn doc_id(id: u8) -> String {
    format!("doc-{id}")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_last_write_wins_and_removes_stick(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let index = open_index();

        // Reference model: doc_id -> last upserted text payload.
        let mut model: HashMap<String, String> = HashMap::new();

        for (seq, op) in ops.iter().enumerate() {
            match op {
                Op::Upsert(id, vector) => {
                    let doc_id = doc_id(*id);
                    let text = format!("payload-{seq}");
                    let outcome = index
                        .upsert(&doc_id, vector, &text, BTreeMap::new(), None)
                        .unwrap();
                    let expected = if model.contains_key(&doc_id) {
                        UpsertOutcome::Updated
                    } else {
                        UpsertOutcome::Inserted
                    };
                    prop_assert_eq!(outcome, expected);
                    model.insert(doc_id, text);
                }
                Op::Remove(id) => {
                    let doc_id = doc_id(*id);
                    let outcome = index.remove(&doc_id, None).unwrap();
                    let expected = if model.remove(&doc_id).is_some() {
                        RemoveOutcome::Removed
                    } else {
                        RemoveOutcome::NotFound
                    };
                    prop_assert_eq!(outcome, expected);
                }
            }
        }

        // P1: get returns the last upserted payload.
        for (doc_id, text) in &model {
            let doc = index.get(doc_id, None).unwrap();
            prop_assert_eq!(&doc.text, text);
        }

        // P2: removed ids are NotFound.
        for id in 0u8..12 {
            let doc_id = doc_id(id);
            if !model.contains_key(&doc_id) {
                prop_assert_eq!(index.get(&doc_id, None).unwrap_err().kind(), "not_found");
            }
        }

        // Stats agree with the model.
        let stats = index.stats(None).unwrap();
        prop_assert_eq!(stats.doc_count as usize, model.len());
    }

    #[test]
    fn prop_search_contract(ops in prop::collection::vec(op_strategy(), 1..40), k in 1usize..8) {
        let index = open_index();
        let mut live: HashMap<String, ()> = HashMap::new();

        for op in &ops {
            match op {
                Op::Upsert(id, vector) => {
                    index.upsert(&doc_id(*id), vector, "t", BTreeMap::new(), None).unwrap();
                    live.insert(doc_id(*id), ());
                }
                Op::Remove(id) => {
                    index.remove(&doc_id(*id), None).unwrap();
                    live.remove(&doc_id(*id));
                }
            }
        }

        let hits = index.search(&[1.0, 0.5, -0.5], k, None, None).unwrap();

        // P3: bounded, sorted, hydratable.
        prop_assert!(hits.len() <= k);
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
        for hit in &hits {
            prop_assert!(index.get(&hit.doc_id, None).is_ok());
            // P2: no removed doc surfaces.
            prop_assert!(live.contains_key(&hit.doc_id));
        }

        // P4: the top list is complete when enough live docs exist. With a
        // tiny corpus and ef >= corpus size the ANN search is exhaustive.
        prop_assert_eq!(hits.len(), k.min(live.len()));
    }

    #[test]
    fn prop_double_ops_idempotence(id in 0u8..4, vector in prop::collection::vec(0.1f32..1.0, 3)) {
        let index = open_index();
        let doc_id = doc_id(id);

        // P6: upsert twice -> {inserted, updated}, equal observable state.
        let first = index.upsert(&doc_id, &vector, "same", BTreeMap::new(), None).unwrap();
        let doc_after_first = index.get(&doc_id, None).unwrap();
        let second = index.upsert(&doc_id, &vector, "same", BTreeMap::new(), None).unwrap();
        let doc_after_second = index.get(&doc_id, None).unwrap();

        prop_assert_eq!(first, UpsertOutcome::Inserted);
        prop_assert_eq!(second, UpsertOutcome::Updated);
        prop_assert_eq!(&doc_after_first.embedding, &doc_after_second.embedding);
        prop_assert_eq!(&doc_after_first.text, &doc_after_second.text);
        prop_assert_eq!(doc_after_first.created_at, doc_after_second.created_at);

        // P6: remove twice -> {removed, not_found}.
        prop_assert_eq!(index.remove(&doc_id, None).unwrap(), RemoveOutcome::Removed);
        prop_assert_eq!(index.remove(&doc_id, None).unwrap(), RemoveOutcome::NotFound);
    }
}
