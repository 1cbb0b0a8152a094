//! Retention window for day buckets and check history.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};

/// Oldest day kept when `today` is the current day.
///
/// Buckets dated strictly before the cutoff are deleted, so a bucket
/// `max_days` old survives and one `max_days + 1` old does not.
pub fn cutoff_day(today: NaiveDate, max_days: u32) -> NaiveDate {
    today - ChronoDuration::days(i64::from(max_days))
}

/// Start of the cutoff day; check history before this instant is deleted.
pub fn cutoff_time(today: NaiveDate, max_days: u32) -> DateTime<Utc> {
    cutoff_day(today, max_days)
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_day() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(cutoff_day(today, 30), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(cutoff_day(today, 0), today);
    }

    #[test]
    fn test_cutoff_time_is_midnight() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let cutoff = cutoff_time(today, 1);
        assert_eq!(cutoff.to_rfc3339(), "2024-03-30T00:00:00+00:00");
    }
}
