//! Filter documents.
//!
//! A filter is a JSON object in the usual document-store convention:
//!
//! ```text
//! {"name": "Ann"}                            equality
//! {"age": {"$gte": 18, "$lt": 65}}           comparison
//! {"name": {"$in": ["Ann", "Bob"]}}          membership
//! {"$or": [{"a": 1}, {"b": {"$exists": true}}]}
//! {"email": {"$regex": "@corp\\.", "$options": "i"}}
//! {"$expr": {"$eq": ["$owner", "$author"]}}
//! ```
//!
//! Filters are parsed once into a small AST so that regular expressions
//! are compiled a single time per query.

use crate::document::{compare_values, lookup_path, values_equal, Document, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::id::DocumentId;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// A parsed filter document.
#[derive(Debug, Clone)]
pub struct Filter {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    Nor(Vec<Node>),
    Field { path: String, conds: Vec<Cond> },
    Expr(Expr),
}

#[derive(Debug, Clone)]
enum Cond {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Not(Vec<Cond>),
}

#[derive(Debug, Clone)]
enum Expr {
    Field(String),
    Literal(Value),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Cmp(Ordering, bool, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Filter {
    /// Parses a filter document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` for non-object input, unknown operators,
    /// malformed operands and invalid regular expressions.
    pub fn parse(value: &Value) -> StoreResult<Self> {
        Ok(Self {
            root: parse_document(value)?,
        })
    }

    /// A filter matching every document.
    #[must_use]
    pub fn all() -> Self {
        Self {
            root: Node::All(Vec::new()),
        }
    }

    /// A filter matching exactly the given identifiers.
    #[must_use]
    pub fn ids(ids: &[DocumentId]) -> Self {
        Self {
            root: Node::Field {
                path: ID_FIELD.to_string(),
                conds: vec![Cond::In(ids.iter().map(DocumentId::to_value).collect())],
            },
        }
    }

    /// Returns the filter document selecting the given identifiers.
    #[must_use]
    pub fn ids_document(ids: &[DocumentId]) -> Value {
        let ids: Vec<Value> = ids.iter().map(DocumentId::to_value).collect();
        json!({ ID_FIELD: { "$in": ids } })
    }

    /// Tests a document against the filter.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.root.matches(doc)
    }
}

fn parse_document(value: &Value) -> StoreResult<Node> {
    let map = value
        .as_object()
        .ok_or_else(|| StoreError::invalid_filter(format!("expected an object, got {value}")))?;
    let mut nodes = Vec::with_capacity(map.len());
    for (key, operand) in map {
        let node = match key.as_str() {
            "$and" => Node::All(parse_document_list(key, operand)?),
            "$or" => Node::Any(parse_document_list(key, operand)?),
            "$nor" => Node::Nor(parse_document_list(key, operand)?),
            "$expr" => Node::Expr(parse_expr(operand)?),
            op if op.starts_with('$') => {
                return Err(StoreError::invalid_filter(format!(
                    "unknown top-level operator {op}"
                )))
            }
            path => Node::Field {
                path: path.to_string(),
                conds: parse_conditions(operand)?,
            },
        };
        nodes.push(node);
    }
    Ok(if nodes.len() == 1 {
        nodes.remove(0)
    } else {
        Node::All(nodes)
    })
}

fn parse_document_list(op: &str, operand: &Value) -> StoreResult<Vec<Node>> {
    let items = operand
        .as_array()
        .ok_or_else(|| StoreError::invalid_filter(format!("{op} expects an array")))?;
    items.iter().map(parse_document).collect()
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn parse_conditions(operand: &Value) -> StoreResult<Vec<Cond>> {
    if !is_operator_object(operand) {
        return Ok(vec![Cond::Eq(operand.clone())]);
    }
    let Some(map) = operand.as_object() else {
        return Ok(vec![Cond::Eq(operand.clone())]);
    };
    let options = map.get("$options").and_then(Value::as_str).unwrap_or("");
    let mut conds = Vec::with_capacity(map.len());
    for (op, arg) in map {
        let cond = match op.as_str() {
            "$eq" => Cond::Eq(arg.clone()),
            "$ne" => Cond::Ne(arg.clone()),
            "$gt" => Cond::Cmp(Ordering::Greater, false, arg.clone()),
            "$gte" => Cond::Cmp(Ordering::Greater, true, arg.clone()),
            "$lt" => Cond::Cmp(Ordering::Less, false, arg.clone()),
            "$lte" => Cond::Cmp(Ordering::Less, true, arg.clone()),
            "$in" => Cond::In(expect_array(op, arg)?),
            "$nin" => Cond::Nin(expect_array(op, arg)?),
            "$exists" => Cond::Exists(truthy(arg)),
            "$regex" => Cond::Regex(compile_regex(arg, options)?),
            "$options" => continue,
            "$not" => Cond::Not(parse_conditions(arg)?),
            other => {
                return Err(StoreError::invalid_filter(format!(
                    "unknown field operator {other}"
                )))
            }
        };
        conds.push(cond);
    }
    Ok(conds)
}

fn expect_array(op: &str, arg: &Value) -> StoreResult<Vec<Value>> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| StoreError::invalid_filter(format!("{op} expects an array")))
}

fn compile_regex(pattern: &Value, options: &str) -> StoreResult<Regex> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| StoreError::invalid_filter("$regex expects a string"))?;
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(StoreError::invalid_filter(format!(
                    "unknown $regex option '{other}'"
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|e| StoreError::invalid_filter(format!("bad $regex: {e}")))
}

fn parse_expr(value: &Value) -> StoreResult<Expr> {
    match value {
        Value::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
            Ok(Expr::Field(s[1..].to_string()))
        }
        Value::Object(map) if map.len() == 1 && is_operator_object(value) => {
            let Some((op, arg)) = map.iter().next() else {
                return Ok(Expr::Literal(value.clone()));
            };
            match op.as_str() {
                "$literal" => Ok(Expr::Literal(arg.clone())),
                "$and" => Ok(Expr::And(parse_expr_list(op, arg)?)),
                "$or" => Ok(Expr::Or(parse_expr_list(op, arg)?)),
                "$not" => {
                    let inner = match arg {
                        Value::Array(items) if items.len() == 1 => &items[0],
                        other => other,
                    };
                    Ok(Expr::Not(Box::new(parse_expr(inner)?)))
                }
                "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$in" => {
                    let [a, b] = parse_pair(op, arg)?;
                    let (a, b) = (Box::new(a), Box::new(b));
                    Ok(match op.as_str() {
                        "$eq" => Expr::Eq(a, b),
                        "$ne" => Expr::Ne(a, b),
                        "$gt" => Expr::Cmp(Ordering::Greater, false, a, b),
                        "$gte" => Expr::Cmp(Ordering::Greater, true, a, b),
                        "$lt" => Expr::Cmp(Ordering::Less, false, a, b),
                        "$lte" => Expr::Cmp(Ordering::Less, true, a, b),
                        _ => Expr::In(a, b),
                    })
                }
                other => Err(StoreError::invalid_filter(format!(
                    "unknown $expr operator {other}"
                ))),
            }
        }
        other => Ok(Expr::Literal(other.clone())),
    }
}

fn parse_expr_list(op: &str, arg: &Value) -> StoreResult<Vec<Expr>> {
    arg.as_array()
        .ok_or_else(|| StoreError::invalid_filter(format!("{op} expects an array")))?
        .iter()
        .map(parse_expr)
        .collect()
}

fn parse_pair(op: &str, arg: &Value) -> StoreResult<[Expr; 2]> {
    match arg.as_array().map(Vec::as_slice) {
        Some([a, b]) => Ok([parse_expr(a)?, parse_expr(b)?]),
        _ => Err(StoreError::invalid_filter(format!(
            "{op} expects exactly two operands"
        ))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

impl Node {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All(nodes) => nodes.iter().all(|n| n.matches(doc)),
            Self::Any(nodes) => nodes.iter().any(|n| n.matches(doc)),
            Self::Nor(nodes) => !nodes.iter().any(|n| n.matches(doc)),
            Self::Field { path, conds } => {
                let value = lookup_path(doc, path);
                conds.iter().all(|c| c.matches(value))
            }
            Self::Expr(expr) => truthy(&expr.eval(doc)),
        }
    }
}

/// Applies `pred` to the value, or to each element when it is an array.
fn any_element(value: &Value, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => pred(value) || items.iter().any(pred),
        other => pred(other),
    }
}

fn eq_matches(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(v) => any_element(v, |item| values_equal(item, expected)),
    }
}

impl Cond {
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Self::Eq(expected) => eq_matches(value, expected),
            Self::Ne(expected) => !eq_matches(value, expected),
            Self::Cmp(ord, or_equal, bound) => value.is_some_and(|v| {
                any_element(v, |item| match compare_values(item, bound) {
                    Some(Ordering::Equal) => *or_equal,
                    Some(o) => o == *ord,
                    None => false,
                })
            }),
            Self::In(options) => options.iter().any(|o| eq_matches(value, o)),
            Self::Nin(options) => !options.iter().any(|o| eq_matches(value, o)),
            Self::Exists(expected) => value.is_some() == *expected,
            Self::Regex(re) => value.is_some_and(|v| {
                any_element(v, |item| item.as_str().is_some_and(|s| re.is_match(s)))
            }),
            Self::Not(conds) => !conds.iter().all(|c| c.matches(value)),
        }
    }
}

impl Expr {
    fn eval(&self, doc: &Document) -> Value {
        match self {
            Self::Field(path) => lookup_path(doc, path).cloned().unwrap_or(Value::Null),
            Self::Literal(v) => v.clone(),
            Self::Eq(a, b) => Value::Bool(values_equal(&a.eval(doc), &b.eval(doc))),
            Self::Ne(a, b) => Value::Bool(!values_equal(&a.eval(doc), &b.eval(doc))),
            Self::Cmp(ord, or_equal, a, b) => {
                let result = match compare_values(&a.eval(doc), &b.eval(doc)) {
                    Some(Ordering::Equal) => *or_equal,
                    Some(o) => o == *ord,
                    None => false,
                };
                Value::Bool(result)
            }
            Self::In(needle, haystack) => {
                let needle = needle.eval(doc);
                let found = haystack
                    .eval(doc)
                    .as_array()
                    .is_some_and(|items| items.iter().any(|i| values_equal(i, &needle)));
                Value::Bool(found)
            }
            Self::And(items) => Value::Bool(items.iter().all(|e| truthy(&e.eval(doc)))),
            Self::Or(items) => Value::Bool(items.iter().any(|e| truthy(&e.eval(doc)))),
            Self::Not(inner) => Value::Bool(!truthy(&inner.eval(doc))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn check(filter: Value, document: Value) -> bool {
        Filter::parse(&filter).unwrap().matches(&doc(document))
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(check(json!({}), json!({"a": 1})));
        assert!(Filter::all().matches(&doc(json!({}))));
    }

    #[test]
    fn equality_and_null() {
        assert!(check(json!({"name": "Ann"}), json!({"name": "Ann"})));
        assert!(!check(json!({"name": "Ann"}), json!({"name": "Bob"})));
        assert!(check(json!({"group_id": null}), json!({"name": "x"})));
        assert!(check(json!({"group_id": null}), json!({"group_id": null})));
    }

    #[test]
    fn array_fields_match_elements() {
        assert!(check(json!({"tags": "red"}), json!({"tags": ["red", "blue"]})));
        assert!(check(json!({"tags": {"$in": ["x", "blue"]}}), json!({"tags": ["red", "blue"]})));
    }

    #[test]
    fn membership() {
        let filter = json!({"name": {"$in": ["Ann", "Bob"]}});
        assert!(check(filter.clone(), json!({"name": "Bob"})));
        assert!(!check(filter, json!({"name": "Cid"})));
        assert!(check(json!({"name": {"$nin": ["Ann"]}}), json!({"name": "Cid"})));
        assert!(!check(json!({"_id": {"$in": []}}), json!({"_id": "x"})));
    }

    #[test]
    fn comparisons() {
        let filter = json!({"age": {"$gte": 18, "$lt": 65}});
        assert!(check(filter.clone(), json!({"age": 18})));
        assert!(!check(filter.clone(), json!({"age": 65})));
        assert!(!check(filter, json!({"name": "no age"})));
        assert!(check(json!({"age": {"$ne": 3}}), json!({"age": 4})));
    }

    #[test]
    fn logical_operators() {
        let filter = json!({"$or": [{"a": 1}, {"b": {"$exists": true}}]});
        assert!(check(filter.clone(), json!({"a": 1})));
        assert!(check(filter.clone(), json!({"b": null})));
        assert!(!check(filter, json!({"a": 2})));
        assert!(check(json!({"$and": [{"a": 1}, {"b": 2}]}), json!({"a": 1, "b": 2})));
        assert!(check(json!({"$nor": [{"a": 1}]}), json!({"a": 2})));
    }

    #[test]
    fn regex_with_options() {
        let filter = json!({"email": {"$regex": "@CORP\\.", "$options": "i"}});
        assert!(check(filter.clone(), json!({"email": "ann@corp.io"})));
        assert!(!check(filter, json!({"email": "ann@home.io"})));
    }

    #[test]
    fn not_inverts_conditions() {
        assert!(check(json!({"age": {"$not": {"$gt": 5}}}), json!({"age": 3})));
    }

    #[test]
    fn expr_compares_fields() {
        let filter = json!({"$expr": {"$eq": ["$owner", "$author"]}});
        assert!(check(filter.clone(), json!({"owner": "a", "author": "a"})));
        assert!(!check(filter, json!({"owner": "a", "author": "b"})));
        let filter = json!({"$expr": {"$and": [{"$gt": ["$qty", 2]}, {"$in": ["$tag", ["x", "y"]]}]}});
        assert!(check(filter, json!({"qty": 3, "tag": "y"})));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(Filter::parse(&json!([1, 2])).is_err());
        assert!(Filter::parse(&json!({"$where": "1"})).is_err());
        assert!(Filter::parse(&json!({"a": {"$in": 3}})).is_err());
        assert!(Filter::parse(&json!({"a": {"$regex": "("}})).is_err());
        assert!(Filter::parse(&json!({"$expr": {"$eq": [1]}})).is_err());
    }

    #[test]
    fn ids_filter() {
        let id = DocumentId::new();
        let filter = Filter::ids(&[id]);
        assert!(filter.matches(&doc(json!({"_id": id.to_string()}))));
        assert!(!filter.matches(&doc(json!({"_id": DocumentId::new().to_string()}))));
        let parsed = Filter::parse(&Filter::ids_document(&[id])).unwrap();
        assert!(parsed.matches(&doc(json!({"_id": id.to_string()}))));
    }
}
