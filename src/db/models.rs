//! Database model types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::ConditionResult;

/// Rolled-up health of a bucket, an endpoint or a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    NoData,
    Success,
    Failure,
    Partial,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NoData => "nodata",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Partial => "partial",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nodata" => Ok(Status::NoData),
            "success" => Ok(Status::Success),
            "failure" => Ok(Status::Failure),
            "partial" => Ok(Status::Partial),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// One check as kept in a day bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionLog {
    pub time: DateTime<Utc>,
    pub conditions: Vec<ConditionResult>,
}

/// All checks of one endpoint on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub key: String,
    /// UTC date, `YYYY-MM-DD`.
    pub day: String,
    pub status: Status,
    pub sla: u32,
    /// Newest first.
    pub logs: Vec<ConditionLog>,
}

/// Whole-endpoint status across all retained buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub key: String,
    pub name: String,
    /// Target URL, or the running version for version endpoints.
    pub url: String,
    pub status: Status,
    pub sla: u32,
}

/// Historical detail of a single check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub id: i64,
    pub key: String,
    pub time: DateTime<Utc>,
    pub http_status: u16,
    pub hostname: String,
    pub ip: String,
    pub connected: bool,
    pub duration_ms: i64,
    pub success: bool,
    pub conditions: Vec<ConditionResult>,
    pub errors: Vec<String>,
    pub certificate_expiration_ms: i64,
    pub dns_rcode: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in [Status::NoData, Status::Success, Status::Failure, Status::Partial] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status)
            );
        }
        assert!("unknown".parse::<Status>().is_err());
    }
}
