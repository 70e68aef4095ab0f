//! Integration tests for atomicity, explicit transactions and
//! persistence.

use docset_core::{EngineConfig, EngineError};
use docset_store::DocumentId;
use docset_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

#[test]
fn open_transactions_are_invisible_until_commit() {
    init_tracing();
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        let txn = env.begin().unwrap();
        txn.model(PERSON).unwrap().create(json!({"name": "Ann"})).unwrap();

        assert_eq!(txn.model(PERSON).unwrap().search(json!({})).unwrap().count().unwrap(), 1);
        assert!(people.search(json!({})).unwrap().is_empty().unwrap());

        txn.commit().unwrap();
        assert_eq!(people.search(json!({})).unwrap().count().unwrap(), 1);
    });
}

#[test]
fn abort_discards_everything() {
    with_engine(|env| {
        let txn = env.begin().unwrap();
        assert!(txn.begin().is_err());
        txn.model(PERSON).unwrap().create(json!({"name": "Ann"})).unwrap();
        txn.abort().unwrap();
        assert!(env.model(PERSON).unwrap().search(json!({})).unwrap().is_empty().unwrap());
    });
}

#[test]
fn failed_transaction_closure_rolls_back() {
    with_engine(|env| {
        let result: Result<(), EngineError> = env.transaction(|txn| {
            let people = txn.model(PERSON)?;
            people.create(json!({"name": "Ann"}))?;
            people.create(json!({"name": null}))?;
            Ok(())
        });
        assert!(matches!(result, Err(EngineError::Required { .. })));
        assert!(env.model(PERSON).unwrap().search(json!({})).unwrap().is_empty().unwrap());

        let created = env
            .transaction(|txn| txn.model(PERSON)?.create(json!({"name": "Bob"}))?.ensure_one())
            .unwrap();
        assert!(env.exists(PERSON, created).unwrap());
    });
}

#[test]
fn relational_failures_undo_the_owner() {
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        let err = people
            .create(json!({"name": "Ann", "tag_ids": [["add", DocumentId::new().to_string()]]}))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(people.search(json!({})).unwrap().is_empty().unwrap());

        let ann = people.create(json!({"name": "Ann"})).unwrap();
        let err = ann
            .write(json!({"age": 31, "address_ids": [["create", {"street": null}]]}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Required { .. }));
        assert_eq!(ann.read(&["age"]).unwrap()[0]["age"], json!(null));
        assert!(env.model(ADDRESS).unwrap().search(json!({})).unwrap().is_empty().unwrap());
    });
}

#[test]
fn failed_calls_inside_an_open_transaction_leave_nothing_behind() {
    with_engine(|env| {
        let txn = env.begin().unwrap();
        let people = txn.model(PERSON).unwrap();
        let bob = people.create(json!({"name": "Bob"})).unwrap();

        let err = people
            .create(json!({"name": "Ann", "tag_ids": [["add", DocumentId::new().to_string()]]}))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(people.search(json!({"name": "Ann"})).unwrap().is_empty().unwrap());

        let err = bob
            .write(json!({"age": 31, "address_ids": [["create", {"street": null}]]}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Required { .. }));
        assert_eq!(bob.read(&["age"]).unwrap()[0]["age"], json!(null));

        txn.commit().unwrap();
        let rows = env.model(PERSON).unwrap().search(json!({})).unwrap().read(&["name", "age"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Bob"));
        assert_eq!(rows[0]["age"], json!(null));
        assert!(env.model(ADDRESS).unwrap().search(json!({})).unwrap().is_empty().unwrap());
    });
}

#[test]
fn transaction_closures_can_recover_from_a_failed_call() {
    with_engine(|env| {
        env.transaction(|txn| {
            let people = txn.model(PERSON)?;
            people.create(json!({"name": "Kept"}))?;
            let failed = people.create(json!({"name": "Lost", "tag_ids": [["add", DocumentId::new().to_string()]]}));
            assert!(failed.is_err());
            Ok(())
        })
        .unwrap();
        let rows = env.model(PERSON).unwrap().search(json!({})).unwrap().read(&["name"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Kept"));
    });
}

#[test]
fn without_implicit_transactions_a_failed_call_still_clears_its_queue() {
    let engine = TestEngine::memory_with_config(EngineConfig::new().implicit_transactions(false));
    let people = engine.model(PERSON).unwrap();
    assert!(people.create(json!([{"name": "Ann"}, {"age": 3}])).is_err());
    people.create(json!({"name": "Bob"})).unwrap();
    let names: Vec<_> = people
        .search(json!({}))
        .unwrap()
        .read(&["name"])
        .unwrap()
        .into_iter()
        .map(|row| row["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("Bob")]);
}

#[test]
fn file_backed_engine_survives_reopen() {
    let engine = TestEngine::file();
    let tag = engine.model(TAG).unwrap().create(json!({"name": "vip"})).unwrap();
    let ann = engine
        .model(PERSON)
        .unwrap()
        .create(json!({"name": "Ann", "tag_ids": [["add", tag.ensure_one().unwrap().to_string()]]}))
        .unwrap()
        .ensure_one()
        .unwrap();
    drop(tag);

    let engine = engine.reopen();
    let people = engine.model(PERSON).unwrap();
    let row = people.browse_ids(&[ann]).read(&["name", "tag_ids"]).unwrap().remove(0);
    assert_eq!(row["name"], json!("Ann"));
    assert_eq!(row["tag_ids"][0][1], json!("vip"));
    let users = engine.model(docset_core::base::USER).unwrap().search(json!({})).unwrap();
    assert_eq!(users.count().unwrap(), 1);

    // Unique indexes are declared again on start.
    let err = engine.model(TAG).unwrap().create(json!({"name": "vip"})).unwrap_err();
    assert!(err.is_uniqueness());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn recordsets_compare_by_identifier_set(
        people in people_strategy(6),
        picks in (positions_strategy(6), positions_strategy(6)),
    ) {
        let engine = TestEngine::memory();
        let created = engine.model(PERSON).unwrap().create(json!(people)).unwrap();
        let ids = created.ids().unwrap();
        let pick = |positions: &[usize]| -> Vec<DocumentId> {
            positions.iter().filter_map(|&p| ids.get(p).copied()).collect()
        };
        let (a, b) = (pick(&picks.0), pick(&picks.1));
        let model = engine.model(PERSON).unwrap();
        let left = model.browse_ids(&a);
        let right = model.browse_ids(&b);

        let same: bool = a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>();
        prop_assert_eq!(left.eq_records(&right).unwrap(), same);
        prop_assert_eq!(left == right, same);
        let all = model.search(json!({})).unwrap();
        prop_assert!(created.eq_records(&all).unwrap());
        prop_assert_eq!(left.count().unwrap(), a.iter().collect::<HashSet<_>>().len());
    }
}
