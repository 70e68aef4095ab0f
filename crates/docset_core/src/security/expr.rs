//! DLS query expressions.
//!
//! A rule's query is a JSON document in which a few bare identifiers
//! stand for facts about the acting user:
//!
//! ```text
//! {"owner_id": uid}
//! {"group_id": {"$in": groups}}
//! {"company_id": context.company_id}
//! ```
//!
//! `uid`, `groups` and `context.<key>` are the only names; anything else
//! is rejected when the query is parsed. Evaluation substitutes values and
//! never calls into the host.

use crate::error::{EngineError, EngineResult};
use crate::environment::Context;
use docset_store::DocumentId;
use serde_json::{Map, Value};

/// Values a query may refer to.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    /// Acting user.
    pub uid: DocumentId,
    /// Groups of the acting user.
    pub groups: &'a [DocumentId],
    /// Environment context.
    pub context: &'a Context,
}

/// A parsed query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A JSON scalar.
    Literal(Value),
    /// An object with expression values.
    Object(Vec<(String, Expr)>),
    /// A list of expressions.
    Array(Vec<Expr>),
    /// The acting user's identifier.
    Uid,
    /// The acting user's group identifiers.
    Groups,
    /// A context value; null when absent.
    Context(String),
}

impl Expr {
    /// Substitutes bound names and returns the resulting JSON value.
    #[must_use]
    pub fn evaluate(&self, scope: &Scope<'_>) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Object(entries) => {
                let map: Map<String, Value> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.evaluate(scope)))
                    .collect();
                Value::Object(map)
            }
            Self::Array(items) => Value::Array(items.iter().map(|e| e.evaluate(scope)).collect()),
            Self::Uid => scope.uid.to_value(),
            Self::Groups => Value::Array(scope.groups.iter().map(DocumentId::to_value).collect()),
            Self::Context(key) => scope.context.get(key).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Parses a query expression.
///
/// # Errors
///
/// Returns `Expression` on syntax errors and unknown names.
pub fn parse(source: &str) -> EngineResult<Expr> {
    let mut parser = Parser {
        src: source,
        pos: 0,
    };
    let expr = parser.expr()?;
    parser.skip_ws();
    if parser.pos != source.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(expr)
}

/// Parses and evaluates a query, which must produce a filter object.
pub fn evaluate_query(source: &str, scope: &Scope<'_>) -> EngineResult<Value> {
    let expr = parse(source)?;
    if !matches!(expr, Expr::Object(_)) {
        return Err(EngineError::expression(format!(
            "query must be an object: {source}"
        )));
    }
    Ok(expr.evaluate(scope))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> EngineError {
        EngineError::expression(format!("{message} at offset {} in {:?}", self.pos, self.src))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, want: char) -> EngineResult<()> {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.pos += want.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{want}'")))
        }
    }

    fn expr(&mut self) -> EngineResult<Expr> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => Ok(Expr::Literal(Value::String(self.string()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.name(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn object(&mut self) -> EngineResult<Expr> {
        self.expect('{')?;
        let mut entries = Vec::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Expr::Object(entries));
        }
        loop {
            self.skip_ws();
            if self.peek() != Some('"') {
                return Err(self.error("expected a quoted key"));
            }
            let key = self.string()?;
            self.expect(':')?;
            entries.push((key, self.expr()?));
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Expr::Object(entries));
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn array(&mut self) -> EngineResult<Expr> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Expr::Array(items));
        }
        loop {
            items.push(self.expr()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(Expr::Array(items));
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn string(&mut self) -> EngineResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut escaped = false;
        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => {
                    return serde_json::from_str(&self.src[start..self.pos])
                        .map_err(|e| self.error(&format!("bad string: {e}")));
                }
                _ => {}
            }
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> EngineResult<Expr> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        serde_json::from_str::<Value>(&self.src[start..self.pos])
            .map(Expr::Literal)
            .map_err(|_| self.error("bad number"))
    }

    fn name(&mut self) -> EngineResult<Expr> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let name = &self.src[start..self.pos];
        match name {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            "uid" => Ok(Expr::Uid),
            "groups" => Ok(Expr::Groups),
            _ => match name.strip_prefix("context.") {
                Some(key) if !key.is_empty() && !key.contains('.') => {
                    Ok(Expr::Context(key.to_string()))
                }
                _ => {
                    self.pos = start;
                    Err(self.error(&format!("unknown name {name:?}")))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str) -> EngineResult<Value> {
        let uid = DocumentId::NIL;
        let groups = [DocumentId::NIL];
        let mut context = Context::new();
        context.insert("company".into(), json!("acme"));
        evaluate_query(
            source,
            &Scope {
                uid,
                groups: &groups,
                context: &context,
            },
        )
    }

    #[test]
    fn plain_json_is_accepted() {
        assert_eq!(
            eval(r#"{"email": "test@document.com", "age": {"$gt": -1.5}, "ok": [true, null]}"#).unwrap(),
            json!({"email": "test@document.com", "age": {"$gt": -1.5}, "ok": [true, null]})
        );
    }

    #[test]
    fn names_are_substituted() {
        let nil = DocumentId::NIL.to_string();
        assert_eq!(
            eval(r#"{"owner": uid, "group_id": {"$in": groups}, "company": context.company, "x": context.missing}"#)
                .unwrap(),
            json!({"owner": nil, "group_id": {"$in": [nil]}, "company": "acme", "x": null})
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        for source in [
            r#"{"a": os}"#,
            r#"{"a": __import__}"#,
            r#"{"a": context}"#,
            r#"{"a": context.a.b}"#,
            r#"{"a": uid()}"#,
        ] {
            assert!(eval(source).is_err(), "{source}");
        }
    }

    #[test]
    fn malformed_queries_are_rejected() {
        assert!(eval(r#"{"a": 1"#).is_err());
        assert!(eval(r#"{a: 1}"#).is_err());
        assert!(eval(r#"["not", "an", "object"]"#).is_err());
        assert!(eval(r#"{"a": 1} extra"#).is_err());
        assert!(eval(r#"{"a": "unterminated}"#).is_err());
    }

    #[test]
    fn escapes_in_strings() {
        assert_eq!(eval(r#"{"a": "q\"uote\\"}"#).unwrap(), json!({"a": "q\"uote\\"}));
    }
}
