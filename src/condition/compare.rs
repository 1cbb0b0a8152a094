//! Typed comparison of resolved operands.

use regex::Regex;
use semver::Version;
use serde_json::Value as JsonValue;

use super::parser::{Comparator, Operand};
use super::value::{resolve, Value};
use super::EvalError;
use crate::probe::FactSheet;

/// Evaluate `left <comparator> right` against a probe's facts.
pub(crate) fn evaluate(
    left: &Operand,
    comparator: Comparator,
    right: &Operand,
    facts: &FactSheet,
) -> Result<bool, EvalError> {
    match comparator {
        Comparator::Eq => equals(left, right, facts),
        Comparator::Ne => equals(left, right, facts).map(|eq| !eq),
        Comparator::Lt | Comparator::Le | Comparator::Gt | Comparator::Ge => {
            let (l, r) = (resolve(left, facts)?, resolve(right, facts)?);
            let (a, b) = numeric_pair(&l, &r).ok_or_else(|| mismatch(&l, &r))?;
            Ok(match comparator {
                Comparator::Lt => a < b,
                Comparator::Le => a <= b,
                Comparator::Gt => a > b,
                _ => a >= b,
            })
        }
        Comparator::Tilde | Comparator::Caret => {
            let actual = parse_version(&resolve(left, facts)?.to_text())?;
            let base = parse_version(&resolve(right, facts)?.to_text())?;
            Ok(in_range(comparator, &actual, &base))
        }
    }
}

fn mismatch(left: &Value, right: &Value) -> EvalError {
    EvalError::Mismatch(format!("cannot order {} and {}", left.to_text(), right.to_text()))
}

fn equals(left: &Operand, right: &Operand, facts: &FactSheet) -> Result<bool, EvalError> {
    match (left, right) {
        (subject, Operand::Pat(pattern)) | (Operand::Pat(pattern), subject) => {
            Ok(glob_match(pattern, &resolve(subject, facts)?.to_text()))
        }
        (subject, Operand::Any(options)) | (Operand::Any(options), subject) => {
            let value = resolve(subject, facts)?;
            Ok(options
                .iter()
                .any(|option| values_equal(&value, &Value::Text(option.clone()))))
        }
        _ => Ok(values_equal(&resolve(left, facts)?, &resolve(right, facts)?)),
    }
}

/// Equality after coercing both sides to a common representation: boolean,
/// then number, then string.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_bool(left), as_bool(right)) {
        return a == b;
    }
    if let Some((a, b)) = numeric_pair(left, right) {
        return a == b;
    }
    left.to_text() == right.to_text()
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) | Value::Node(JsonValue::Bool(b)) => Some(*b),
        Value::Text(s) | Value::Node(JsonValue::String(s)) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Numeric view of a value. Durations are expressed in milliseconds, so a
/// plain number compared with a duration is read as milliseconds.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Millis(ms) => Some(*ms as f64),
        Value::Node(JsonValue::Number(n)) => n.as_f64(),
        Value::Text(s) | Value::Node(JsonValue::String(s)) => numeric_literal(s),
        _ => None,
    }
}

fn numeric_literal(text: &str) -> Option<f64> {
    if let Some(ms) = parse_duration(text) {
        return Some(ms as f64);
    }
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    Some((as_number(left)?, as_number(right)?))
}

/// Parse a duration literal such as `300s`, `5m` or `48h` into milliseconds.
pub(crate) fn parse_duration(text: &str) -> Option<i64> {
    let text = text.trim();
    let unit = text.chars().last()?;
    let factor = match unit {
        's' => 1_000,
        'm' => 60_000,
        'h' => 3_600_000,
        _ => return None,
    };
    let digits = &text[..text.len() - 1];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()?.checked_mul(factor)
}

/// Glob match where `*` stands for any run of characters.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("(?s)^{}$", body)) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::warn!("Invalid pattern {}: {}", pattern, e);
            false
        }
    }
}

/// Parse a semantic version, tolerating a leading `v`.
pub(crate) fn parse_version(text: &str) -> Result<Version, EvalError> {
    let trimmed = text.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).map_err(|e| EvalError::Version(format!("{}: {}", text, e)))
}

/// An upper bound that would overflow leaves the range open above.
fn in_range(comparator: Comparator, actual: &Version, base: &Version) -> bool {
    let upper = match comparator {
        Comparator::Tilde => base.minor.checked_add(1).map(|minor| Version::new(base.major, minor, 0)),
        _ => base.major.checked_add(1).map(|major| Version::new(major, 0, 0)),
    };
    actual >= base && upper.map_or(true, |upper| *actual < upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("300s"), Some(300_000));
        assert_eq!(parse_duration("5m"), Some(300_000));
        assert_eq!(parse_duration("48h"), Some(172_800_000));
        assert_eq!(parse_duration("1.5h"), None);
        assert_eq!(parse_duration("1h30m"), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("300"), None);
    }

    #[test]
    fn test_values_equal_coercion() {
        assert!(values_equal(&Value::Number(200.0), &Value::Text("200".into())));
        assert!(values_equal(&Value::Bool(true), &Value::Text("true".into())));
        assert!(values_equal(
            &Value::Node(JsonValue::String("UP".into())),
            &Value::Text("UP".into())
        ));
        assert!(values_equal(&Value::Node(serde_json::json!(1)), &Value::Text("1.0".into())));
        assert!(!values_equal(&Value::Text("127.0.0.1".into()), &Value::Text("127.0.0.2".into())));
        assert!(values_equal(&Value::Millis(1000), &Value::Text("1s".into())));
    }

    #[test]
    fn test_range_at_numeric_limit_is_open_above() {
        let max = u64::MAX;
        let tilde_base = Version::new(1, max, 0);
        assert!(in_range(Comparator::Tilde, &Version::new(1, max, 3), &tilde_base));
        assert!(!in_range(Comparator::Tilde, &Version::new(1, 0, 0), &tilde_base));

        let caret_base = Version::new(max, 0, 0);
        assert!(in_range(Comparator::Caret, &Version::new(max, 7, 0), &caret_base));
        assert!(!in_range(Comparator::Caret, &Version::new(1, 0, 0), &caret_base));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*UP*", "status: UP!"));
        assert!(glob_match("1.*", "1.2.3"));
        assert!(!glob_match("1.*", "10.2"));
        assert!(glob_match("a*c", "abbbc"));
        assert!(!glob_match("a*c", "abbbd"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_in_range() {
        let base = Version::parse("1.2.3").unwrap();
        let check = |comparator, v: &str| in_range(comparator, &Version::parse(v).unwrap(), &base);

        assert!(check(Comparator::Tilde, "1.2.3"));
        assert!(check(Comparator::Tilde, "1.2.9"));
        assert!(!check(Comparator::Tilde, "1.2.0"));
        assert!(!check(Comparator::Tilde, "1.3.0"));
        assert!(!check(Comparator::Tilde, "2.0.0"));

        assert!(check(Comparator::Caret, "1.2.3"));
        assert!(check(Comparator::Caret, "1.9.9"));
        assert!(!check(Comparator::Caret, "1.2.0"));
        assert!(!check(Comparator::Caret, "2.0.0"));
    }

    #[test]
    fn test_parse_version_accepts_v_prefix() {
        assert_eq!(parse_version("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert!(matches!(parse_version("1.2"), Err(EvalError::Version(_))));
    }
}
