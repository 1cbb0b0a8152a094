//! Condition text parsing.
//!
//! A condition is `<operand> <comparator> <operand>`. Operands are placeholders
//! such as `[STATUS]` or `[BODY].data[0].id`, bare literals, or one of the
//! functions `len`, `has`, `pat` and `any`.

use std::fmt;

use super::ConditionError;

/// Comparison operator between two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `~X.Y.Z`: same major and minor, at least the given patch.
    Tilde,
    /// `^X.Y.Z`: same major, at least the given version.
    Caret,
}

/// Two-character tokens come first so that `<=` is never read as `<`.
const COMPARATORS: [(&str, Comparator); 8] = [
    ("==", Comparator::Eq),
    ("!=", Comparator::Ne),
    ("<=", Comparator::Le),
    (">=", Comparator::Ge),
    ("<", Comparator::Lt),
    (">", Comparator::Gt),
    ("~", Comparator::Tilde),
    ("^", Comparator::Caret),
];

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Tilde => "~",
            Comparator::Caret => "^",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Comparator::Tilde | Comparator::Caret)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a body path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A probe fact referenced from a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Status,
    ResponseTime,
    Ip,
    /// The response body, optionally narrowed by a path.
    Body(Vec<PathSegment>),
    Connected,
    CertificateExpiration,
    DnsRcode,
    Version,
}

impl Placeholder {
    /// Parse a bracketed placeholder token.
    ///
    /// Returns `Ok(None)` when the text is not a known placeholder, in which
    /// case it is treated as a literal.
    fn parse(text: &str) -> Result<Option<Self>, ConditionError> {
        let Some(rest) = text.strip_prefix('[') else {
            return Ok(None);
        };
        let Some(close) = rest.find(']') else {
            return Ok(None);
        };
        let (name, suffix) = (&rest[..close], &rest[close + 1..]);

        let placeholder = match name {
            "BODY" => return parse_path(suffix).map(|path| Some(Placeholder::Body(path))),
            "STATUS" => Placeholder::Status,
            "RESPONSE_TIME" => Placeholder::ResponseTime,
            "IP" => Placeholder::Ip,
            "CONNECTED" => Placeholder::Connected,
            "CERTIFICATE_EXPIRATION" => Placeholder::CertificateExpiration,
            "DNS_RCODE" => Placeholder::DnsRcode,
            "VERSION" => Placeholder::Version,
            _ => return Ok(None),
        };

        if suffix.is_empty() {
            Ok(Some(placeholder))
        } else {
            Ok(None)
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Status => f.write_str("[STATUS]"),
            Placeholder::ResponseTime => f.write_str("[RESPONSE_TIME]"),
            Placeholder::Ip => f.write_str("[IP]"),
            Placeholder::Body(path) => write!(f, "[BODY]{}", PathDisplay(path)),
            Placeholder::Connected => f.write_str("[CONNECTED]"),
            Placeholder::CertificateExpiration => f.write_str("[CERTIFICATE_EXPIRATION]"),
            Placeholder::DnsRcode => f.write_str("[DNS_RCODE]"),
            Placeholder::Version => f.write_str("[VERSION]"),
        }
    }
}

/// Renders a body path the way it is written in a condition.
pub(crate) struct PathDisplay<'a>(pub &'a [PathSegment]);

impl fmt::Display for PathDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.0 {
            match segment {
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Parse the path that follows `[BODY]`, e.g. `.data[0].id`.
fn parse_path(text: &str) -> Result<Vec<PathSegment>, ConditionError> {
    let malformed = || ConditionError::Malformed(format!("invalid body path: {}", text));
    let mut path = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() {
                return Err(malformed());
            }
            path.push(PathSegment::Key(key.to_string()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(malformed)?;
            let index = after[..end].trim().parse().map_err(|_| malformed())?;
            path.push(PathSegment::Index(index));
            rest = &after[end + 1..];
        } else {
            return Err(malformed());
        }
    }

    Ok(path)
}

/// A parsed operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Placeholder(Placeholder),
    Literal(String),
    Len(Box<Operand>),
    Has(Box<Operand>),
    Pat(String),
    Any(Vec<String>),
}

impl Operand {
    /// Whether this operand is `pat(..)` or `any(..)`.
    pub fn is_matcher(&self) -> bool {
        matches!(self, Operand::Pat(_) | Operand::Any(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Placeholder(p) => write!(f, "{}", p),
            Operand::Literal(text) => f.write_str(text),
            Operand::Len(inner) => write!(f, "len({})", inner),
            Operand::Has(inner) => write!(f, "has({})", inner),
            Operand::Pat(pattern) => write!(f, "pat({})", pattern),
            Operand::Any(values) => write!(f, "any({})", values.join(", ")),
        }
    }
}

/// Split a condition into its left text, comparator and right text.
///
/// The first comparator found outside brackets and parentheses wins.
pub(crate) fn split(text: &str) -> Result<(&str, Comparator, &str), ConditionError> {
    let mut parens = 0i32;
    let mut brackets = 0i32;

    for (i, c) in text.char_indices() {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            _ if parens == 0 && brackets == 0 => {
                let found = COMPARATORS
                    .iter()
                    .find(|(token, _)| text[i..].starts_with(token));
                if let Some((token, comparator)) = found {
                    let left = text[..i].trim();
                    let right = text[i + token.len()..].trim();
                    if left.is_empty() || right.is_empty() {
                        return Err(ConditionError::Malformed(text.to_string()));
                    }
                    return Ok((left, *comparator, right));
                }
            }
            _ => {}
        }
    }

    Err(ConditionError::Malformed(text.to_string()))
}

/// Parse one side of a condition.
pub(crate) fn parse_operand(text: &str) -> Result<Operand, ConditionError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ConditionError::Malformed("empty operand".to_string()));
    }

    if let Some((name, inner)) = function_call(text) {
        return match name {
            "len" => Ok(Operand::Len(Box::new(parse_operand(inner)?))),
            "has" => Ok(Operand::Has(Box::new(parse_operand(inner)?))),
            "pat" => {
                let pattern = inner.trim();
                if pattern.is_empty() {
                    return Err(ConditionError::Malformed(text.to_string()));
                }
                Ok(Operand::Pat(pattern.to_string()))
            }
            "any" => {
                let values = split_arguments(inner);
                if values.iter().any(|v| v.is_empty()) {
                    return Err(ConditionError::Malformed(text.to_string()));
                }
                Ok(Operand::Any(values))
            }
            other => Err(ConditionError::UnknownFunction(other.to_string())),
        };
    }

    match Placeholder::parse(text)? {
        Some(placeholder) => Ok(Operand::Placeholder(placeholder)),
        None => Ok(Operand::Literal(text.to_string())),
    }
}

/// Recognize `name(inner)` where name is a plain identifier.
fn function_call(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let name = &text[..open];
    let is_identifier = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_');
    if !is_identifier || !text.ends_with(')') {
        return None;
    }
    Some((name, &text[open + 1..text.len() - 1]))
}

/// Split `any(..)` arguments on top-level commas.
fn split_arguments(text: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                values.push(text[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    values.push(text[start..].trim().to_string());
    values
}
