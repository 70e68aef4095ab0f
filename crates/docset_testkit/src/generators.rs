//! Property-based test generators using proptest.
//!
//! Provides strategies for generating sample-model values that pass
//! field validation.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,11}").expect("Invalid regex")
}

/// Strategy for generating ages.
pub fn age_strategy() -> impl Strategy<Value = i64> {
    0i64..120
}

/// Strategy for generating `res.person` creation values.
pub fn person_values_strategy() -> impl Strategy<Value = Value> {
    (name_strategy(), prop::option::of(age_strategy())).prop_map(|(name, age)| match age {
        Some(age) => json!({ "name": name, "age": age }),
        None => json!({ "name": name }),
    })
}

/// Strategy for generating a batch of `res.person` creation values.
pub fn people_strategy(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(person_values_strategy(), 1..=max.max(1))
}

/// Strategy for picking a subset of positions below `len`, in any order
/// and possibly repeated.
pub fn positions_strategy(len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..len.max(1), 0..=len * 2)
}
