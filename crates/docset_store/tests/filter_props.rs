//! Property tests for filter evaluation.

use docset_store::{Document, Filter};
use proptest::prelude::*;
use serde_json::{json, Value};

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

proptest! {
    #[test]
    fn nin_is_the_complement_of_in(value in -50i64..50, options in prop::collection::vec(-50i64..50, 0..8)) {
        let d = doc(json!({"n": value}));
        let is_in = Filter::parse(&json!({"n": {"$in": options.clone()}})).unwrap().matches(&d);
        let not_in = Filter::parse(&json!({"n": {"$nin": options.clone()}})).unwrap().matches(&d);
        prop_assert_ne!(is_in, not_in);
        prop_assert_eq!(is_in, options.contains(&value));
    }

    #[test]
    fn range_agrees_with_integer_order(value in -100i64..100, low in -100i64..100, high in -100i64..100) {
        let d = doc(json!({"n": value}));
        let filter = Filter::parse(&json!({"n": {"$gte": low, "$lt": high}})).unwrap();
        prop_assert_eq!(filter.matches(&d), low <= value && value < high);
    }

    #[test]
    fn or_of_equalities_matches_in(value in "[a-c]", options in prop::collection::vec("[a-c]", 1..4)) {
        let d = doc(json!({"s": value}));
        let branches: Vec<Value> = options.iter().map(|o| json!({"s": o})).collect();
        let or = Filter::parse(&json!({"$or": branches})).unwrap().matches(&d);
        let is_in = Filter::parse(&json!({"s": {"$in": options}})).unwrap().matches(&d);
        prop_assert_eq!(or, is_in);
    }
}
