//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::endpoint::Endpoint;
use crate::probe::ProbeOutcome;
use crate::scheduler::{retention, rollup};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Aggregation ---

    /// Fold one check into today's bucket and the endpoint summary.
    ///
    /// Evicts expired buckets and history, prepends the check to the day's
    /// log, recomputes bucket and endpoint status and stores the detail row,
    /// all in one transaction. Returns the updated bucket.
    pub fn record_check(
        &self,
        endpoint: &Endpoint,
        outcome: &ProbeOutcome,
        max_days: u32,
    ) -> Result<DayBucket, DbError> {
        let time = outcome.facts.timestamp;
        let today = time.date_naive();
        let day = rollup::day_key(today);
        let key = endpoint.key.as_str();

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM endpoint_results WHERE key = ?1 AND day < ?2",
            params![key, rollup::day_key(retention::cutoff_day(today, max_days))],
        )?;
        tx.execute(
            "DELETE FROM check_results WHERE key = ?1 AND time < ?2",
            params![key, format_time(retention::cutoff_time(today, max_days))],
        )?;

        let mut bucket = load_bucket(&tx, key, &day)?.unwrap_or_else(|| DayBucket::empty(key, &day));
        bucket.record(ConditionLog {
            time,
            conditions: outcome.condition_results.clone(),
        });
        write_bucket(&tx, &bucket)?;

        let (status, sla) = rollup::summarize(&load_buckets(&tx, key)?);
        tx.execute(
            "INSERT INTO endpoints (key, name, url, status, sla, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
             name=excluded.name, url=excluded.url, status=excluded.status,
             sla=excluded.sla, updated_at=excluded.updated_at",
            params![
                key,
                endpoint.name,
                endpoint.display_url(),
                status.as_str(),
                sla,
                format_time(time),
            ],
        )?;

        let facts = &outcome.facts;
        tx.execute(
            "INSERT INTO check_results (key, time, http_status, hostname, ip, connected, duration_ms,
             success, conditions, errors, certificate_expiration_ms, dns_rcode, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                key,
                format_time(time),
                facts.http_status,
                facts.hostname,
                facts.ip,
                facts.connected,
                facts.duration.as_millis() as i64,
                outcome.success,
                serde_json::to_string(&outcome.condition_results)?,
                serde_json::to_string(&facts.errors)?,
                facts.certificate_expiration.num_milliseconds(),
                facts.dns_rcode,
                facts.version,
            ],
        )?;

        tx.commit()?;
        Ok(bucket)
    }

    // --- Endpoints ---

    /// Get an endpoint summary by key.
    pub fn get_endpoint(&self, key: &str) -> Result<EndpointSummary, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT key, name, url, status, sla FROM endpoints WHERE key = ?1",
            params![key],
            summary_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    // --- Day buckets ---

    /// Get all retained buckets of an endpoint, newest day first.
    pub fn get_day_buckets(&self, key: &str) -> Result<Vec<DayBucket>, DbError> {
        let conn = self.lock()?;
        load_buckets(&conn, key)
    }

    /// Get one bucket, if the endpoint was checked that day.
    #[cfg(test)]
    pub fn get_day_bucket(&self, key: &str, day: &str) -> Result<Option<DayBucket>, DbError> {
        let conn = self.lock()?;
        load_bucket(&conn, key, day)
    }

    /// Insert or replace a bucket.
    #[cfg(test)]
    pub fn save_day_bucket(&self, bucket: &DayBucket) -> Result<(), DbError> {
        let conn = self.lock()?;
        write_bucket(&conn, bucket)
    }

    // --- Check history ---

    /// Get the most recent checks of an endpoint, newest first.
    pub fn get_check_results(&self, key: &str, limit: i64) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, key, time, http_status, hostname, ip, connected, duration_ms, success,
             conditions, errors, certificate_expiration_ms, dns_rcode, version
             FROM check_results WHERE key = ?1 ORDER BY time DESC, id DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![key, limit], |row| {
                let time_str: String = row.get(2)?;
                let conditions: String = row.get(9)?;
                let errors: String = row.get(10)?;
                Ok((
                    CheckRecord {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                        http_status: row.get(3)?,
                        hostname: row.get(4)?,
                        ip: row.get(5)?,
                        connected: row.get(6)?,
                        duration_ms: row.get(7)?,
                        success: row.get(8)?,
                        conditions: Vec::new(),
                        errors: Vec::new(),
                        certificate_expiration_ms: row.get(11)?,
                        dns_rcode: row.get(12)?,
                        version: row.get(13)?,
                    },
                    conditions,
                    errors,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(mut record, conditions, errors)| {
                record.conditions = serde_json::from_str(&conditions)?;
                record.errors = serde_json::from_str(&errors)?;
                Ok(record)
            })
            .collect()
    }
}

fn summary_from_row(row: &Row<'_>) -> SqlResult<EndpointSummary> {
    let status: String = row.get(3)?;
    Ok(EndpointSummary {
        key: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        status: status.parse().unwrap_or_default(),
        sla: row.get(4)?,
    })
}

fn bucket_from_parts(key: String, day: String, status: String, sla: u32, logs: &str) -> Result<DayBucket, DbError> {
    Ok(DayBucket {
        key,
        day,
        status: status.parse().unwrap_or_default(),
        sla,
        logs: serde_json::from_str(logs)?,
    })
}

fn load_bucket(conn: &Connection, key: &str, day: &str) -> Result<Option<DayBucket>, DbError> {
    let row = conn
        .query_row(
            "SELECT key, day, status, sla, logs FROM endpoint_results WHERE key = ?1 AND day = ?2",
            params![key, day],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(key, day, status, sla, logs)| bucket_from_parts(key, day, status, sla, &logs))
        .transpose()
}

fn load_buckets(conn: &Connection, key: &str) -> Result<Vec<DayBucket>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT key, day, status, sla, logs FROM endpoint_results WHERE key = ?1 ORDER BY day DESC",
    )?;
    let rows = stmt
        .query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<SqlResult<Vec<_>>>()?;

    rows.into_iter()
        .map(|(key, day, status, sla, logs)| bucket_from_parts(key, day, status, sla, &logs))
        .collect()
}

fn write_bucket(conn: &Connection, bucket: &DayBucket) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO endpoint_results (key, day, status, sla, logs)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(key, day) DO UPDATE SET
         status=excluded.status, sla=excluded.sla, logs=excluded.logs",
        params![
            bucket.key,
            bucket.day,
            bucket.status.as_str(),
            bucket.sla,
            serde_json::to_string(&bucket.logs)?,
        ],
    )?;
    Ok(())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionResult;
    use crate::endpoint::EndpointConfig;
    use crate::probe::FactSheet;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn endpoint() -> Endpoint {
        Endpoint::try_from(EndpointConfig {
            name: "Front Page".to_string(),
            url: "https://example.org/".to_string(),
            conditions: vec!["[STATUS] == 200".to_string(), "[CONNECTED] == true".to_string()],
            ..Default::default()
        })
        .unwrap()
    }

    fn outcome(time: DateTime<Utc>, results: &[bool]) -> ProbeOutcome {
        let condition_results: Vec<ConditionResult> = results
            .iter()
            .enumerate()
            .map(|(i, ok)| ConditionResult {
                condition: format!("c{}", i),
                success: *ok,
            })
            .collect();
        ProbeOutcome {
            facts: FactSheet {
                http_status: 200,
                hostname: "example.org".to_string(),
                connected: true,
                timestamp: time,
                ..Default::default()
            },
            success: condition_results.iter().all(|c| c.success),
            condition_results,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_record_check_updates_bucket_and_summary() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let endpoint = endpoint();

        store.record_check(&endpoint, &outcome(noon(), &[true, true]), 30).unwrap();
        store
            .record_check(&endpoint, &outcome(noon() + ChronoDuration::minutes(1), &[true, false]), 30)
            .unwrap();
        let bucket = store
            .record_check(&endpoint, &outcome(noon() + ChronoDuration::minutes(2), &[false, false]), 30)
            .unwrap();

        assert_eq!(bucket.day, "2024-06-15");
        assert_eq!(bucket.status, Status::Partial);
        assert_eq!(bucket.sla, 50);
        assert_eq!(store.get_day_bucket("front-page", "2024-06-15").unwrap(), Some(bucket));

        let summary = store.get_endpoint("front-page").unwrap();
        assert_eq!(summary.name, "Front Page");
        assert_eq!(summary.url, "https://example.org/");
        assert_eq!(summary.status, Status::Partial);
        assert_eq!(summary.sla, 50);

        let history = store.get_check_results("front-page", 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].time, noon() + ChronoDuration::minutes(2));
        assert_eq!(history[0].conditions.len(), 2);
        assert!(!history[0].success);
    }

    #[test]
    fn test_eleventh_check_drops_oldest() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let endpoint = endpoint();

        for minute in 0..11 {
            let time = noon() + ChronoDuration::minutes(minute);
            store.record_check(&endpoint, &outcome(time, &[true]), 30).unwrap();
        }

        let bucket = store.get_day_bucket("front-page", "2024-06-15").unwrap().unwrap();
        assert_eq!(bucket.logs.len(), 10);
        assert_eq!(bucket.logs[0].time, noon() + ChronoDuration::minutes(10));
        assert_eq!(bucket.logs[9].time, noon() + ChronoDuration::minutes(1));
    }

    #[test]
    fn test_retention_evicts_before_write() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let endpoint = endpoint();

        let mut kept = DayBucket::empty("front-page", "2024-06-08");
        kept.record(ConditionLog {
            time: noon() - ChronoDuration::days(7),
            conditions: vec![ConditionResult {
                condition: "c0".to_string(),
                success: false,
            }],
        });
        store.save_day_bucket(&kept).unwrap();
        store.save_day_bucket(&DayBucket::empty("front-page", "2024-06-07")).unwrap();
        store.save_day_bucket(&DayBucket::empty("other", "2024-06-01")).unwrap();

        store.record_check(&endpoint, &outcome(noon(), &[true]), 7).unwrap();

        let days: Vec<String> = store
            .get_day_buckets("front-page")
            .unwrap()
            .into_iter()
            .map(|b| b.day)
            .collect();
        assert_eq!(days, vec!["2024-06-15", "2024-06-08"]);
        // Other keys are untouched.
        assert!(store.get_day_bucket("other", "2024-06-01").unwrap().is_some());

        let summary = store.get_endpoint("front-page").unwrap();
        assert_eq!(summary.status, Status::Partial);
        assert_eq!(summary.sla, 50);
    }

    #[test]
    fn test_failed_record_applies_nothing() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let endpoint = endpoint();

        store.record_check(&endpoint, &outcome(noon(), &[true, true]), 7).unwrap();
        store.save_day_bucket(&DayBucket::empty("front-page", "2024-06-07")).unwrap();
        let buckets_before = store.get_day_buckets("front-page").unwrap();
        let summary_before = store.get_endpoint("front-page").unwrap();

        // The history insert runs last, after eviction and the bucket write.
        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_history BEFORE INSERT ON check_results
                 BEGIN SELECT RAISE(ABORT, 'history rejected'); END;",
            )
            .unwrap();

        let later = noon() + ChronoDuration::hours(1);
        assert!(store.record_check(&endpoint, &outcome(later, &[false, true]), 7).is_err());

        assert_eq!(store.get_day_buckets("front-page").unwrap(), buckets_before);
        assert!(store.get_day_bucket("front-page", "2024-06-07").unwrap().is_some());
        assert_eq!(store.get_day_bucket("front-page", "2024-06-15").unwrap().unwrap().logs.len(), 1);
        assert_eq!(store.get_endpoint("front-page").unwrap(), summary_before);
        assert_eq!(store.get_check_results("front-page", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_version_endpoint_summary_url() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let endpoint = Endpoint::try_from(EndpointConfig {
            name: "backend".to_string(),
            url: "https://example.org/".to_string(),
            version: "1.4.0".to_string(),
            conditions: vec!["[VERSION] ^1.0.0".to_string()],
            ..Default::default()
        })
        .unwrap();

        store.record_check(&endpoint, &outcome(noon(), &[true]), 30).unwrap();
        assert_eq!(store.get_endpoint("backend").unwrap().url, "Running Version: 1.4.0");
        assert!(matches!(store.get_endpoint("missing"), Err(DbError::NotFound)));
    }

    #[test]
    fn test_parse_db_time() {
        let t = parse_db_time("2024-06-15 12:00:00.000000000").unwrap();
        assert_eq!(t, noon());
        assert_eq!(parse_db_time("2024-06-15T12:00:00Z"), Some(noon()));
        assert!(parse_db_time("yesterday").is_none());
    }
}
