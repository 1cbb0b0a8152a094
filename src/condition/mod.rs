//! Condition expression language.
//!
//! Conditions are parsed once when the configuration is loaded, asked which
//! facts they need before a probe runs, and evaluated against the probe's
//! [`FactSheet`] afterwards.

mod compare;
mod parser;
mod value;

pub use parser::{Comparator, Operand, Placeholder};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::FactSheet;

/// Errors raised while parsing or validating a condition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("invalid condition format: does not match '<VALUE> <COMPARATOR> <VALUE>': {0}")]
    Malformed(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("invalid version format: {0}")]
    InvalidVersionFormat(String),
    #[error("invalid use of {function}: {reason}")]
    IllegalFunction { function: String, reason: String },
    #[error("range comparator {0} only applies to [VERSION]")]
    RangeOperand(Comparator),
    #[error("[VERSION] requires the endpoint to declare a version")]
    VersionUndeclared,
}

/// Errors raised while evaluating a single condition.
///
/// These never escape the condition: they turn its outcome into `false`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("response body was not retrieved")]
    BodyUnavailable,
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("path [BODY]{0} not found")]
    Missing(String),
    #[error("type mismatch: {0}")]
    Mismatch(String),
    #[error("invalid version: {0}")]
    Version(String),
}

/// Facts a condition needs the probe to collect.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub body: bool,
    pub ip: bool,
}

impl Requirements {
    pub fn merge(self, other: Requirements) -> Requirements {
        Requirements {
            body: self.body || other.body,
            ip: self.ip || other.ip,
        }
    }

    fn of(operand: &Operand) -> Requirements {
        match operand {
            Operand::Placeholder(Placeholder::Body(_)) => Requirements {
                body: true,
                ip: false,
            },
            Operand::Placeholder(Placeholder::Ip) => Requirements {
                body: false,
                ip: true,
            },
            Operand::Len(inner) | Operand::Has(inner) => Requirements::of(inner),
            _ => Requirements::default(),
        }
    }
}

/// Outcome of one condition for one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub condition: String,
    pub success: bool,
}

/// A parsed and validated condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    text: String,
    left: Operand,
    comparator: Comparator,
    right: Operand,
}

impl Condition {
    /// Parse and validate a condition.
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let (left_text, comparator, right_text) = parser::split(text)?;
        let condition = Condition {
            text: text.trim().to_string(),
            left: parser::parse_operand(left_text)?,
            comparator,
            right: parser::parse_operand(right_text)?,
        };
        condition.validate()?;
        Ok(condition)
    }

    fn validate(&self) -> Result<(), ConditionError> {
        for operand in [&self.left, &self.right] {
            if operand.is_matcher() && self.comparator != Comparator::Eq && self.comparator != Comparator::Ne {
                return Err(ConditionError::IllegalFunction {
                    function: operand.to_string(),
                    reason: format!("cannot be used with {}", self.comparator),
                });
            }
            if let Operand::Len(inner) | Operand::Has(inner) = operand {
                if !matches!(**inner, Operand::Placeholder(Placeholder::Body(_))) {
                    return Err(ConditionError::IllegalFunction {
                        function: operand.to_string(),
                        reason: "argument must be a [BODY] path".to_string(),
                    });
                }
            }
        }

        if self.comparator.is_range() {
            if self.left != Operand::Placeholder(Placeholder::Version) {
                return Err(ConditionError::RangeOperand(self.comparator));
            }
            let version = match &self.right {
                Operand::Literal(text) => text,
                other => return Err(ConditionError::InvalidVersionFormat(other.to_string())),
            };
            compare::parse_version(version)
                .map_err(|_| ConditionError::InvalidVersionFormat(version.clone()))?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    #[cfg(test)]
    pub fn left(&self) -> &Operand {
        &self.left
    }

    #[cfg(test)]
    pub fn right(&self) -> &Operand {
        &self.right
    }

    /// Whether the condition reads the application version.
    pub fn uses_version(&self) -> bool {
        let version = Operand::Placeholder(Placeholder::Version);
        self.comparator.is_range() || self.left == version || self.right == version
    }

    /// Facts the probe must collect for this condition to be evaluated.
    pub fn requirements(&self) -> Requirements {
        Requirements::of(&self.left).merge(Requirements::of(&self.right))
    }

    /// Evaluate against a probe's facts, reporting errors to the caller.
    pub fn try_evaluate(&self, facts: &FactSheet) -> Result<bool, EvalError> {
        compare::evaluate(&self.left, self.comparator, &self.right, facts)
    }

    /// Evaluate against a probe's facts. An evaluation error fails the condition.
    pub fn evaluate(&self, facts: &FactSheet) -> ConditionResult {
        let success = match self.try_evaluate(facts) {
            Ok(success) => success,
            Err(e) => {
                tracing::debug!("Condition {:?} failed to evaluate: {}", self.text, e);
                false
            }
        };
        ConditionResult {
            condition: self.text.clone(),
            success,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.comparator, self.right)
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}
