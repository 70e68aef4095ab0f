//! Access control.
//!
//! Two layers guard every recordset operation:
//!
//! - **ACL**: may this actor perform this operation on this model at all?
//!   Rules in `base.acl` are matched on the actor's groups and on global
//!   (group-less) rules; any matching rule with the operation's flag set
//!   grants access. No matching rule means no access.
//! - **DLS**: which documents may the operation reach? Rules in `base.dls`
//!   carry a query expression (see [`expr`]). Global rules are ANDed,
//!   group rules are ORed, and both parts are ANDed together.
//!
//! Reads through `search` are narrowed by the DLS predicate. `read`,
//! `write` and `unlink` instead prove that the recordset is unchanged by
//! the predicate and fail with an access error otherwise, so a caller
//! never gets a silently smaller result.
//!
//! The root identity bypasses both layers.

pub mod expr;

use crate::base::{ACL, DLS, GROUP_DLS_REL, USER, USER_GROUP_REL};
use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::recordset::Recordset;
use docset_store::{Document, DocumentId, Filter, ID_FIELD};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// A guarded recordset operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `search`, `read` and related reads.
    Read,
    /// `write`.
    Write,
    /// `create`.
    Create,
    /// `unlink`.
    Unlink,
}

impl Operation {
    /// Every operation.
    pub const ALL: [Self; 4] = [Self::Read, Self::Write, Self::Create, Self::Unlink];

    /// Returns the lowercase operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
            Self::Unlink => "unlink",
        }
    }

    /// Returns the `base.acl` flag granting this operation.
    #[must_use]
    pub const fn acl_flag(self) -> &'static str {
        match self {
            Self::Read => "allow_read",
            Self::Write => "allow_write",
            Self::Create => "allow_create",
            Self::Unlink => "allow_unlink",
        }
    }

    /// Returns the `base.dls` flag enabling a rule for this operation.
    #[must_use]
    pub const fn dls_flag(self) -> &'static str {
        match self {
            Self::Read => "on_read",
            Self::Write => "on_write",
            Self::Create => "on_create",
            Self::Unlink => "on_unlink",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting user as seen by access rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User identifier.
    pub actor: DocumentId,
    /// Groups the user belongs to.
    pub groups: Vec<DocumentId>,
}

/// Loads the acting user and their groups.
///
/// Returns `None` when the actor has no `base.user` document.
pub fn principal(env: &Environment) -> EngineResult<Option<Principal>> {
    let actor = env.actor();
    if env.find_ids_raw(USER, &Filter::ids_document(&[actor]))?.is_empty() {
        return Ok(None);
    }
    let groups = env
        .find_raw(USER_GROUP_REL, &json!({ "user_id": actor.to_value() }))?
        .iter()
        .filter_map(|rel| rel.get("group_id"))
        .filter_map(|value| DocumentId::from_value(value).ok())
        .collect();
    Ok(Some(Principal { actor, groups }))
}

fn denied(env: &Environment, model: &str, operation: Operation) -> EngineError {
    warn!(model = %model, operation = %operation, actor = %env.actor(), "access denied");
    EngineError::Access {
        model: model.to_string(),
        operation,
        actor: env.actor(),
    }
}

fn require_principal(env: &Environment, model: &str, operation: Operation) -> EngineResult<Principal> {
    principal(env)?.ok_or_else(|| denied(env, model, operation))
}

/// Checks the ACL for `operation` on `model`.
///
/// # Errors
///
/// Returns `Access` when no matching rule grants the operation.
pub fn check_model_access(env: &Environment, model: &str, operation: Operation) -> EngineResult<()> {
    if env.is_root() {
        return Ok(());
    }
    let principal = require_principal(env, model, operation)?;
    let groups: Vec<Value> = principal.groups.iter().map(DocumentId::to_value).collect();
    let rules = env.find_raw(
        ACL,
        &json!({
            "model": model,
            "$or": [{ "group_id": { "$in": groups } }, { "group_id": null }],
        }),
    )?;
    let flag = operation.acl_flag();
    if rules.iter().any(|rule| rule.get(flag) == Some(&Value::Bool(true))) {
        Ok(())
    } else {
        Err(denied(env, model, operation))
    }
}

/// Builds the DLS predicate for `operation` on `model`.
///
/// Returns `None` when no rule applies.
///
/// # Errors
///
/// Returns `Expression` when a rule's query does not parse.
pub fn dls_predicate(
    env: &Environment,
    model: &str,
    operation: Operation,
) -> EngineResult<Option<Value>> {
    if env.is_root() {
        return Ok(None);
    }
    let principal = require_principal(env, model, operation)?;
    let rules = env.find_raw(DLS, &json!({ "model": model, operation.dls_flag(): true }))?;
    if rules.is_empty() {
        return Ok(None);
    }

    let rule_ids: Vec<DocumentId> = rules
        .iter()
        .filter_map(|rule| rule.get(ID_FIELD))
        .filter_map(|id| DocumentId::from_value(id).ok())
        .collect();
    let mut rule_groups: HashMap<DocumentId, HashSet<DocumentId>> = HashMap::new();
    let ids: Vec<Value> = rule_ids.iter().map(DocumentId::to_value).collect();
    for rel in env.find_raw(GROUP_DLS_REL, &json!({ "dls_id": { "$in": ids } }))? {
        let pair = (rel.get("dls_id"), rel.get("group_id"));
        if let (Some(dls), Some(group)) = pair {
            if let (Ok(dls), Ok(group)) = (DocumentId::from_value(dls), DocumentId::from_value(group)) {
                rule_groups.entry(dls).or_default().insert(group);
            }
        }
    }

    let scope = expr::Scope {
        uid: principal.actor,
        groups: &principal.groups,
        context: env.context(),
    };
    let mut global = Vec::new();
    let mut scoped = Vec::new();
    for rule in &rules {
        let Some(id) = rule.get(ID_FIELD).and_then(|v| DocumentId::from_value(v).ok()) else {
            continue;
        };
        let query = rule.get("query").and_then(Value::as_str).unwrap_or("{}");
        match rule_groups.get(&id) {
            None => global.push(expr::evaluate_query(query, &scope)?),
            Some(groups) if principal.groups.iter().any(|g| groups.contains(g)) => {
                scoped.push(expr::evaluate_query(query, &scope)?);
            }
            Some(_) => {}
        }
    }

    let mut parts = global;
    match scoped.len() {
        0 => {}
        1 => parts.extend(scoped),
        _ => parts.push(json!({ "$or": scoped })),
    }
    let predicate = match parts.len() {
        0 => return Ok(None),
        1 => parts.remove(0),
        _ => json!({ "$and": parts }),
    };
    debug!(model = %model, operation = %operation, predicate = %predicate, "dls predicate");
    Ok(Some(predicate))
}

/// Checks the ACL and ANDs the DLS predicate into `predicate`.
pub(crate) fn restrict(
    env: &Environment,
    model: &str,
    operation: Operation,
    predicate: Value,
) -> EngineResult<Value> {
    check_model_access(env, model, operation)?;
    Ok(match dls_predicate(env, model, operation)? {
        Some(dls) => json!({ "$and": [predicate, dls] }),
        None => predicate,
    })
}

/// Checks the ACL and proves that the DLS predicate does not change the
/// set of documents `records` resolves to.
///
/// # Errors
///
/// Returns `Access` when the ACL denies the operation or when the
/// recordset reaches documents the DLS predicate excludes.
pub fn check_access(records: &Recordset, operation: Operation) -> EngineResult<()> {
    let env = records.env();
    let model = records.model_name();
    check_model_access(env, model, operation)?;
    let Some(dls) = dls_predicate(env, model, operation)? else {
        return Ok(());
    };
    let requested: HashSet<DocumentId> = env.find_ids_raw(model, records.predicate())?.into_iter().collect();
    let allowed: HashSet<DocumentId> = env
        .find_ids_raw(model, &json!({ "$and": [records.predicate(), dls] }))?
        .into_iter()
        .collect();
    if requested == allowed {
        Ok(())
    } else {
        Err(denied(env, model, operation))
    }
}

/// Checks that a document about to be created satisfies the create DLS
/// predicate of `model`.
pub(crate) fn check_create_candidate(
    env: &Environment,
    model: &str,
    candidate: &Document,
) -> EngineResult<()> {
    let Some(dls) = dls_predicate(env, model, Operation::Create)? else {
        return Ok(());
    };
    if Filter::parse(&dls)?.matches(candidate) {
        Ok(())
    } else {
        Err(denied(env, model, Operation::Create))
    }
}
