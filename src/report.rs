//! Dashboard data built from endpoint summaries and day buckets.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;

use crate::condition::ConditionResult;
use crate::db::{DayBucket, EndpointSummary, Status};
use crate::scheduler::rollup;

/// One endpoint as the dashboard shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointReport {
    pub key: String,
    pub name: String,
    pub url: String,
    pub sla: u32,
    /// Status of the most recent check.
    pub status: Status,
    /// Newest day first.
    pub reports: Vec<DayReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayReport {
    pub day: String,
    pub status: Status,
    pub sla: u32,
    pub condition_results: Vec<ConditionResult>,
}

impl DayReport {
    fn empty(day: String) -> Self {
        Self {
            day,
            status: Status::NoData,
            sla: 0,
            condition_results: Vec::new(),
        }
    }

    /// Shows the newest failing check of a bad day, the newest check otherwise.
    fn from_bucket(bucket: &DayBucket) -> Self {
        let shown = match bucket.status {
            Status::Success | Status::NoData => bucket.logs.first(),
            Status::Failure | Status::Partial => bucket
                .logs
                .iter()
                .find(|log| log.conditions.iter().any(|c| !c.success))
                .or_else(|| bucket.logs.first()),
        };

        Self {
            day: bucket.day.clone(),
            status: bucket.status,
            sla: bucket.sla,
            condition_results: shown.map(|log| log.conditions.clone()).unwrap_or_default(),
        }
    }
}

/// Build the report of one endpoint over the `days` days ending with `today`.
///
/// Days without a bucket are filled with `nodata`.
pub fn build(summary: &EndpointSummary, buckets: &[DayBucket], today: NaiveDate, days: u32) -> EndpointReport {
    let by_day: HashMap<&str, &DayBucket> = buckets.iter().map(|b| (b.day.as_str(), b)).collect();

    let reports = (0..i64::from(days))
        .map(|offset| rollup::day_key(today - ChronoDuration::days(offset)))
        .map(|day| match by_day.get(day.as_str()) {
            Some(bucket) => DayReport::from_bucket(bucket),
            None => DayReport::empty(day),
        })
        .collect();

    let status = buckets
        .iter()
        .filter(|b| !b.logs.is_empty())
        .max_by(|a, b| a.day.cmp(&b.day))
        .map(rollup::latest_status)
        .unwrap_or(Status::NoData);

    EndpointReport {
        key: summary.key.clone(),
        name: summary.name.clone(),
        url: summary.url.clone(),
        sla: summary.sla,
        status,
        reports,
    }
}

/// Render reports as a script defining `endpoints`.
pub fn render_script(reports: &[EndpointReport]) -> Result<String, serde_json::Error> {
    Ok(format!("const endpoints = {};", serde_json::to_string(reports)?))
}

/// Write the script form of the reports to `path`.
pub fn write_script<P: AsRef<Path>>(path: P, reports: &[EndpointReport]) -> io::Result<()> {
    let script = render_script(reports).map_err(io::Error::other)?;
    std::fs::write(path, script)
}
