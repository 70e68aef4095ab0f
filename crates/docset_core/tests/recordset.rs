//! Integration tests for recordset reads, writes and deletes.

use docset_core::{bootstrap, EngineConfig, EngineError, Environment, Field, Mapped, Model, OnDelete};
use docset_store::{DocumentId, MemoryStore};
use docset_testkit::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn id_str(id: DocumentId) -> String {
    id.to_string()
}

#[test]
fn create_search_read_person() {
    init_tracing();
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        let ann = people.create(json!({"name": "Ann", "age": 30})).unwrap();
        let id = ann.ensure_one().unwrap();

        let found = people.search(json!({"name": "Ann"})).unwrap();
        let rows = found.read(&["name", "age"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["_id"], json!(id_str(id)));
        assert_eq!(rows[0]["name"], json!("Ann"));
        assert_eq!(rows[0]["age"], json!(30));
        assert_eq!(rows[0].len(), 3);

        let bob = people.create(json!({"name": "Bob"})).unwrap();
        let bob_id = bob.ensure_one().unwrap();
        let row = people.browse(id_str(bob_id)).unwrap().read(&[]).unwrap().remove(0);
        assert_eq!(row["age"], json!(null));
        assert_eq!(row["name"], json!("Bob"));
    });
}

#[test]
fn defaults_setters_and_coercion() {
    with_engine(|env| {
        let person = env
            .model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "nickname": "  ANNIE ", "birthday": "2024-01-02"}))
            .unwrap();
        let row = person.read(&[]).unwrap().remove(0);
        assert_eq!(row["active"], json!(true));
        assert_eq!(row["state"], json!("draft"));
        assert_eq!(row["nickname"], json!("annie"));
        assert_eq!(row["birthday"], json!("2024-01-02T00:00:00"));
        assert_eq!(row["tag_ids"], json!([]));
        assert_eq!(row["address_ids"], json!([]));

        let err = person.write(json!({"state": "archived"})).unwrap_err();
        assert!(err.is_validation());
        let err = person.write(json!({"birthday": "yesterday"})).unwrap_err();
        assert!(err.is_validation());
    });
}

#[test]
fn search_in_then_write_every_match() {
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        people
            .create(json!([{"name": "Ann"}, {"name": "Bob"}, {"name": "Cid"}]))
            .unwrap();

        let pair = people.search(json!({"name": {"$in": ["Ann", "Bob"]}})).unwrap();
        assert_eq!(pair.count().unwrap(), 2);
        pair.write(json!({"name": "Zed"})).unwrap();

        assert_eq!(people.search(json!({"name": "Zed"})).unwrap().count().unwrap(), 2);
        assert_eq!(people.search(json!({"name": "Cid"})).unwrap().count().unwrap(), 1);
        assert!(people.search(json!({"name": "Ann"})).unwrap().is_empty().unwrap());
    });
}

#[test]
fn browse_never_checks_existence() {
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        let ghost = DocumentId::new();
        let records = people.browse(id_str(ghost)).unwrap();
        assert_eq!(records.count().unwrap(), 0);
        assert!(matches!(
            records.ensure_one(),
            Err(EngineError::EnsureOne { count: 0, .. })
        ));
        assert!(people.browse("not-an-id").is_err());
        assert!(people.browse(json!(12)).is_err());
    });
}

#[test]
fn recordset_combinators() {
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        let all = people
            .create(json!([
                {"name": "Ann", "age": 30},
                {"name": "Bob", "age": 15},
                {"name": "Cid", "age": 40},
            ]))
            .unwrap();
        assert_eq!(all.count().unwrap(), 3);

        let adults = all.filtered(json!({"age": {"$gte": 18}})).unwrap();
        assert_eq!(adults.count().unwrap(), 2);
        assert!(adults.eq_records(&people.search(json!({"age": {"$gt": 17}})).unwrap()).unwrap());

        let mut ages = match adults.mapped("age").unwrap() {
            Mapped::Values(values) => values,
            Mapped::Records(_) => panic!("age is scalar"),
        };
        ages.sort_by_key(|v| v.as_i64());
        assert_eq!(ages, vec![json!(30), json!(40)]);

        let mut iter = all.iter().unwrap();
        assert_eq!(iter.len(), 3);
        let singles: Vec<DocumentId> = iter.by_ref().map(|r| r.ensure_one().unwrap()).collect();
        assert_eq!(singles.len(), 3);
        iter.rewind();
        assert_eq!(iter.count(), 3);

        let bob = people.search(json!({"name": "Bob"})).unwrap();
        assert!(all.contains(bob.ensure_one().unwrap()).unwrap());
        assert!(!adults.contains(bob.ensure_one().unwrap()).unwrap());
        assert_eq!(bob.get_field("age").unwrap().as_scalar(), Some(&json!(15)));
        assert!(all.get_field("age").is_err());
    });
}

#[test]
fn many2one_and_many2many_read_as_pairs() {
    with_engine(|env| {
        let country = env
            .model(COUNTRY)
            .unwrap()
            .create(json!({"name": "Peru", "code": "PE"}))
            .unwrap();
        let tags = env
            .model(TAG)
            .unwrap()
            .create(json!([{"name": "vip"}, {"name": "new"}]))
            .unwrap();
        let tag_ids: Vec<String> = tags.ids().unwrap().into_iter().map(id_str).collect();
        let country_id = country.ensure_one().unwrap();

        let ann = env
            .model(PERSON)
            .unwrap()
            .create(json!({
                "name": "Ann",
                "country_id": id_str(country_id),
                "tag_ids": [["replace", tag_ids]],
            }))
            .unwrap();
        let row = ann.read(&["country_id", "tag_ids"]).unwrap().remove(0);
        assert_eq!(row["country_id"], json!([id_str(country_id), "Peru"]));
        let labels: HashSet<&str> = row["tag_ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|pair| pair[1].as_str().unwrap())
            .collect();
        assert_eq!(labels, HashSet::from(["vip", "new"]));

        let linked = ann.get_field("tag_ids").unwrap();
        assert!(linked.as_records().unwrap().eq_records(&tags).unwrap());
        let Mapped::Records(countries) = ann.mapped("country_id").unwrap() else {
            panic!("country_id is relational");
        };
        assert_eq!(countries.ids().unwrap(), vec![country_id]);

        // The inverse side sees the same junction rows.
        let vip = tags.filtered(json!({"name": "vip"})).unwrap();
        let people = vip.get_field("person_ids").unwrap();
        assert_eq!(people.as_records().unwrap().ids().unwrap(), ann.ids().unwrap());
    });
}

#[test]
fn many2one_target_must_exist() {
    with_engine(|env| {
        let err = env
            .model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "country_id": id_str(DocumentId::new())}))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(env.model(PERSON).unwrap().search(json!({})).unwrap().count().unwrap(), 0);
    });
}

#[test]
fn one2many_operations() {
    with_engine(|env| {
        let ann = env
            .model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "address_ids": [["create", {"street": "Main"}]]}))
            .unwrap();
        let addresses = env.model(ADDRESS).unwrap();
        assert_eq!(addresses.search(json!({})).unwrap().count().unwrap(), 1);

        ann.write(json!({"address_ids": [["create", {"street": "Second"}]]}))
            .unwrap();
        let owned = ann.get_field("address_ids").unwrap();
        let owned = owned.as_records().unwrap();
        assert_eq!(owned.count().unwrap(), 2);

        let main = addresses.search(json!({"street": "Main"})).unwrap().ensure_one().unwrap();
        let second = addresses.search(json!({"street": "Second"})).unwrap().ensure_one().unwrap();

        ann.write(json!({"address_ids": [["remove", id_str(main)]]})).unwrap();
        let row = addresses.browse_ids(&[main]).read(&["person_id"]).unwrap().remove(0);
        assert_eq!(row["person_id"], json!(null));

        ann.write(json!({"address_ids": [["purge", id_str(second)]]})).unwrap();
        assert_eq!(addresses.search(json!({})).unwrap().ids().unwrap(), vec![main]);

        ann.write(json!({"address_ids": [["add", id_str(main)], ["write", id_str(main), {"street": "Main St"}]]}))
            .unwrap();
        let row = ann.read(&["address_ids"]).unwrap().remove(0);
        assert_eq!(row["address_ids"], json!([[id_str(main), "Main St"]]));

        ann.write(json!({"address_ids": "clear"})).unwrap();
        assert!(ann.read(&["address_ids"]).unwrap()[0]["address_ids"]
            .as_array()
            .unwrap()
            .is_empty());
    });
}

#[test]
fn plural_operations_rejected_on_create() {
    with_engine(|env| {
        let err = env
            .model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "tag_ids": [["clear"]]}))
            .unwrap_err();
        assert!(err.is_validation());
        let err = env
            .model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "tag_ids": [["link", id_str(DocumentId::new())]]}))
            .unwrap_err();
        assert!(err.is_validation());
    });
}

#[test]
fn duplicate_many2many_add_is_a_uniqueness_error() {
    with_engine(|env| {
        let tag = env.model(TAG).unwrap().create(json!({"name": "vip"})).unwrap();
        let tag_id = id_str(tag.ensure_one().unwrap());
        let ann = env
            .model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "tag_ids": [["add", tag_id]]}))
            .unwrap();

        let err = ann.write(json!({"tag_ids": [["add", tag_id]]})).unwrap_err();
        assert!(err.is_uniqueness(), "{err}");
        let links = env.model(PERSON_TAG_REL).unwrap().search(json!({})).unwrap();
        assert_eq!(links.count().unwrap(), 1);

        ann.write(json!({"tag_ids": [["remove", tag_id]]})).unwrap();
        assert_eq!(links.search(json!({})).unwrap().count().unwrap(), 0);
        assert_eq!(env.model(TAG).unwrap().search(json!({})).unwrap().count().unwrap(), 1);
    });
}

#[test]
fn restrict_blocks_delete() {
    with_engine(|env| {
        let country = env.model(COUNTRY).unwrap().create(json!({"name": "Peru"})).unwrap();
        env.model(PERSON)
            .unwrap()
            .create(json!({"name": "Ann", "country_id": id_str(country.ensure_one().unwrap())}))
            .unwrap();

        let err = country.unlink().unwrap_err();
        assert!(matches!(
            err,
            EngineError::DeletionConstraint { ref referencing_model, ref field, .. }
                if referencing_model == PERSON && field == "country_id"
        ));
        assert_eq!(country.count().unwrap(), 1);
    });
}

#[test]
fn cascade_and_set_null() {
    with_engine(|env| {
        let country = env.model(COUNTRY).unwrap().create(json!({"name": "Chile"})).unwrap();
        let country_id = id_str(country.ensure_one().unwrap());
        let boss = env.model(PERSON).unwrap().create(json!({"name": "Boss"})).unwrap();
        let tag = env.model(TAG).unwrap().create(json!({"name": "vip"})).unwrap();
        let ann = env
            .model(PERSON)
            .unwrap()
            .create(json!({
                "name": "Ann",
                "manager_id": id_str(boss.ensure_one().unwrap()),
                "tag_ids": [["add", id_str(tag.ensure_one().unwrap())]],
                "address_ids": [["create", {"street": "Main", "country_id": country_id}]],
            }))
            .unwrap();
        let addresses = env.model(ADDRESS).unwrap();
        let address = addresses.search(json!({})).unwrap();

        // SET NULL on the address, nothing else references the country.
        assert_eq!(country.unlink().unwrap(), 1);
        assert_eq!(address.read(&["country_id"]).unwrap()[0]["country_id"], json!(null));

        // SET NULL on a self reference.
        boss.unlink().unwrap();
        assert_eq!(ann.read(&["manager_id"]).unwrap()[0]["manager_id"], json!(null));

        // CASCADE to addresses; junction rows always go.
        assert_eq!(ann.unlink().unwrap(), 1);
        assert_eq!(addresses.search(json!({})).unwrap().count().unwrap(), 0);
        assert_eq!(env.model(PERSON_TAG_REL).unwrap().search(json!({})).unwrap().count().unwrap(), 0);
        assert_eq!(tag.count().unwrap(), 1);
    });
}

#[test]
fn restrict_ignores_references_deleted_together() {
    let folder = Model::builder("doc.folder")
        .field("name", Field::char())
        .field("parent_id", Field::many2one("doc.folder").on_delete(OnDelete::Restrict))
        .build();
    let registry = bootstrap::registry([folder], EngineConfig::default()).unwrap();
    let env: Environment = bootstrap::start(registry, Arc::new(MemoryStore::new())).unwrap();
    let folders = env.model("doc.folder").unwrap();
    let parent = folders.create(json!({"name": "root"})).unwrap();
    let parent_id = parent.ensure_one().unwrap();
    let child = folders
        .create(json!({"name": "child", "parent_id": id_str(parent_id)}))
        .unwrap();

    assert!(parent.unlink().is_err());
    let both = folders.browse_ids(&[parent_id, child.ensure_one().unwrap()]);
    assert_eq!(both.unlink().unwrap(), 2);
    assert_eq!(folders.search(json!({})).unwrap().count().unwrap(), 0);
}

#[test]
fn unlink_purges_external_identifiers() {
    with_engine(|env| {
        let countries = env.model(COUNTRY).unwrap();
        let outcome = countries
            .load(&["id", "name", "code"], &[vec![json!("country_pe"), json!("Peru"), json!("PE")]])
            .unwrap();
        assert!(outcome.is_ok(), "{:?}", outcome.errors);
        let peru = countries.get("country_pe").unwrap().unwrap();
        assert_eq!(peru.ids().unwrap(), outcome.ids);

        peru.unlink().unwrap();
        assert!(countries.get("country_pe").unwrap().is_none());
    });
}

#[test]
fn unique_fields_are_enforced() {
    with_engine(|env| {
        let people = env.model(PERSON).unwrap();
        people.create(json!({"name": "Ann", "email": "ann@example.com"})).unwrap();
        let err = people
            .create(json!({"name": "Other Ann", "email": "ann@example.com"}))
            .unwrap_err();
        assert!(err.is_uniqueness());
        assert_eq!(people.search(json!({})).unwrap().count().unwrap(), 1);
    });
}

#[test]
fn unknown_model_and_field() {
    with_engine(|env| {
        assert!(matches!(env.model("res.nothing"), Err(EngineError::UnknownModel { .. })));
        let people = env.model(PERSON).unwrap();
        assert!(matches!(
            people.create(json!({"name": "Ann", "shoe_size": 9})),
            Err(EngineError::UnknownField { .. })
        ));
        assert!(people.create(json!("Ann")).is_err());
    });
}
