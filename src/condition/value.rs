//! Resolution of operands against a probe's facts.

use serde_json::Value as JsonValue;

use super::parser::{Operand, PathDisplay, PathSegment, Placeholder};
use super::EvalError;
use crate::probe::FactSheet;

/// A resolved operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    /// A duration in milliseconds; may be negative for expired certificates.
    Millis(i64),
    Bool(bool),
    Text(String),
    /// A node extracted from a JSON body.
    Node(JsonValue),
}

impl Value {
    /// The string form used for equality and pattern matching.
    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Millis(ms) => ms.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Text(s) => s.clone(),
            Value::Node(node) => node_text(node),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Canonical compact string of a JSON node. Strings are unquoted.
pub(crate) fn node_text(node: &JsonValue) -> String {
    match node {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk a path through a JSON document.
///
/// A missing key or an out-of-range index is reported as
/// [`EvalError::Missing`]; a present `null` is returned as a node.
pub fn traverse<'a>(root: &'a JsonValue, path: &[PathSegment]) -> Result<&'a JsonValue, EvalError> {
    let mut node = root;
    for (depth, segment) in path.iter().enumerate() {
        let next = match (segment, node) {
            (PathSegment::Key(key), JsonValue::Object(map)) => map.get(key),
            (PathSegment::Index(index), JsonValue::Array(items)) => items.get(*index),
            _ => None,
        };
        node = next.ok_or_else(|| EvalError::Missing(PathDisplay(&path[..=depth]).to_string()))?;
    }
    Ok(node)
}

/// What a `[BODY]` placeholder points at.
enum BodyRef {
    /// No path: the raw body text.
    Raw(String),
    Node(JsonValue),
}

fn lookup_body(facts: &FactSheet, path: &[PathSegment]) -> Result<BodyRef, EvalError> {
    let body = facts.body.as_deref().ok_or(EvalError::BodyUnavailable)?;
    if path.is_empty() {
        return Ok(BodyRef::Raw(String::from_utf8_lossy(body).into_owned()));
    }
    let root: JsonValue =
        serde_json::from_slice(body).map_err(|e| EvalError::InvalidJson(e.to_string()))?;
    traverse(&root, path).map(|node| BodyRef::Node(node.clone()))
}

/// Resolve an operand into a value.
///
/// `pat(..)` and `any(..)` are matchers rather than values and are handled by
/// the comparison step.
pub(crate) fn resolve(operand: &Operand, facts: &FactSheet) -> Result<Value, EvalError> {
    match operand {
        Operand::Literal(text) => Ok(Value::Text(text.clone())),
        Operand::Placeholder(placeholder) => resolve_placeholder(placeholder, facts),
        Operand::Len(inner) => {
            let path = body_path(inner)?;
            let length = match lookup_body(facts, path)? {
                BodyRef::Raw(text) => text.chars().count(),
                BodyRef::Node(JsonValue::Array(items)) => items.len(),
                BodyRef::Node(node) => node_text(&node).chars().count(),
            };
            Ok(Value::Number(length as f64))
        }
        Operand::Has(inner) => {
            let path = body_path(inner)?;
            match lookup_body(facts, path) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(EvalError::Missing(_)) => Ok(Value::Bool(false)),
                Err(e) => Err(e),
            }
        }
        Operand::Pat(_) | Operand::Any(_) => Err(EvalError::Mismatch(format!(
            "{} is only valid with == or !=",
            operand
        ))),
    }
}

fn body_path(operand: &Operand) -> Result<&[PathSegment], EvalError> {
    match operand {
        Operand::Placeholder(Placeholder::Body(path)) => Ok(path),
        other => Err(EvalError::Mismatch(format!("{} is not a body path", other))),
    }
}

fn resolve_placeholder(placeholder: &Placeholder, facts: &FactSheet) -> Result<Value, EvalError> {
    let value = match placeholder {
        Placeholder::Status => Value::Number(f64::from(facts.http_status)),
        Placeholder::ResponseTime => {
            Value::Millis(i64::try_from(facts.duration.as_millis()).unwrap_or(i64::MAX))
        }
        Placeholder::Ip => Value::Text(facts.ip.clone()),
        Placeholder::Connected => Value::Bool(facts.connected),
        Placeholder::CertificateExpiration => {
            Value::Millis(facts.certificate_expiration.num_milliseconds())
        }
        Placeholder::DnsRcode => Value::Text(facts.dns_rcode.clone()),
        Placeholder::Version => Value::Text(facts.version.clone()),
        Placeholder::Body(path) => match lookup_body(facts, path)? {
            BodyRef::Raw(text) => Value::Text(text),
            BodyRef::Node(node) => Value::Node(node),
        },
    };
    Ok(value)
}
