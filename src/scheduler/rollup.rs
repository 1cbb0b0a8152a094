//! Day bucket rollup: status classification and SLA tallies.

use chrono::{DateTime, NaiveDate, Utc};

use crate::db::{ConditionLog, DayBucket, Status};

/// Maximum checks kept in one day bucket.
pub const MAX_LOG_ENTRIES: usize = 10;

/// Format of bucket day keys.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Day key of a date.
pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// Day key of the UTC date a check ran on.
pub fn day_of(time: DateTime<Utc>) -> String {
    day_key(time.date_naive())
}

/// Classify a condition-level success count.
///
/// `total == 0` means nothing was checked and yields `nodata` with SLA 0.
pub fn classify(success: usize, total: usize) -> (Status, u32) {
    if total == 0 {
        (Status::NoData, 0)
    } else if success == 0 {
        (Status::Failure, 0)
    } else if success == total {
        (Status::Success, 100)
    } else {
        let sla = (success as f64 * 100.0 / total as f64).round() as u32;
        (Status::Partial, sla)
    }
}

/// Tally every condition of every log entry.
pub fn tally<'a, I>(logs: I) -> (Status, u32)
where
    I: IntoIterator<Item = &'a ConditionLog>,
{
    let mut success = 0;
    let mut total = 0;
    for log in logs {
        total += log.conditions.len();
        success += log.conditions.iter().filter(|c| c.success).count();
    }
    classify(success, total)
}

impl DayBucket {
    /// A bucket with no checks yet.
    pub fn empty(key: &str, day: &str) -> Self {
        Self {
            key: key.to_string(),
            day: day.to_string(),
            status: Status::NoData,
            sla: 0,
            logs: Vec::new(),
        }
    }

    /// Prepend a check, drop the oldest beyond the cap and recompute status.
    pub fn record(&mut self, log: ConditionLog) {
        self.logs.insert(0, log);
        self.logs.truncate(MAX_LOG_ENTRIES);
        let (status, sla) = tally(&self.logs);
        self.status = status;
        self.sla = sla;
    }
}

/// Endpoint status across every retained bucket.
pub fn summarize(buckets: &[DayBucket]) -> (Status, u32) {
    tally(buckets.iter().flat_map(|b| b.logs.iter()))
}

/// Status of the most recent check in a bucket, for display.
///
/// A bucket holding fewer than two checks reports `nodata`.
pub fn latest_status(bucket: &DayBucket) -> Status {
    if bucket.logs.len() < 2 {
        return Status::NoData;
    }
    let conditions = &bucket.logs[0].conditions;
    let passed = conditions.iter().filter(|c| c.success).count();
    if passed == conditions.len() {
        Status::Success
    } else if passed == 0 {
        Status::Failure
    } else {
        Status::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionResult;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn log(minute: i64, outcomes: &[bool]) -> ConditionLog {
        ConditionLog {
            time: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute),
            conditions: outcomes
                .iter()
                .enumerate()
                .map(|(i, ok)| ConditionResult {
                    condition: format!("[STATUS] == {}", 200 + i),
                    success: *ok,
                })
                .collect(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0, 0), (Status::NoData, 0));
        assert_eq!(classify(0, 4), (Status::Failure, 0));
        assert_eq!(classify(4, 4), (Status::Success, 100));
        assert_eq!(classify(1, 3), (Status::Partial, 33));
        assert_eq!(classify(2, 3), (Status::Partial, 67));
    }

    #[test]
    fn test_mixed_day_is_partial_fifty() {
        let mut bucket = DayBucket::empty("api", "2024-05-01");
        bucket.record(log(0, &[true, true]));
        bucket.record(log(1, &[true, false]));
        bucket.record(log(2, &[false, false]));

        assert_eq!(bucket.status, Status::Partial);
        assert_eq!(bucket.sla, 50);
    }

    #[test]
    fn test_log_is_capped_newest_first() {
        let mut bucket = DayBucket::empty("api", "2024-05-01");
        for minute in 0..11 {
            bucket.record(log(minute, &[true]));
        }

        assert_eq!(bucket.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(bucket.logs[0], log(10, &[true]));
        assert_eq!(bucket.logs[9], log(1, &[true]));
    }

    #[test]
    fn test_empty_bucket_is_nodata() {
        let bucket = DayBucket::empty("api", "2024-05-01");
        assert_eq!(bucket.status, Status::NoData);
        assert_eq!(bucket.sla, 0);
        assert_eq!(summarize(&[bucket]), (Status::NoData, 0));
    }

    #[test]
    fn test_summarize_spans_all_buckets() {
        let mut yesterday = DayBucket::empty("api", "2024-04-30");
        yesterday.record(log(0, &[false]));
        let mut today = DayBucket::empty("api", "2024-05-01");
        today.record(log(0, &[true]));
        today.record(log(1, &[true]));
        today.record(log(2, &[true]));

        assert_eq!(summarize(&[yesterday, today]), (Status::Partial, 75));
    }

    #[test]
    fn test_latest_status() {
        let mut bucket = DayBucket::empty("api", "2024-05-01");
        assert_eq!(latest_status(&bucket), Status::NoData);

        bucket.record(log(0, &[true]));
        assert_eq!(latest_status(&bucket), Status::NoData);

        bucket.record(log(1, &[true, false]));
        assert_eq!(latest_status(&bucket), Status::Partial);

        bucket.record(log(2, &[false, false]));
        assert_eq!(latest_status(&bucket), Status::Failure);

        bucket.record(log(3, &[true, true]));
        assert_eq!(latest_status(&bucket), Status::Success);
    }

    #[test]
    fn test_day_of_uses_utc_date() {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap();
        assert_eq!(day_of(time), "2024-05-01");
    }
}
