use crate::aggregation::{MinuteAggregator, SummaryBucket};
use crate::error::{Error, Result};
use crate::sample::{from_micros, to_micros, NewSample, Sample};
use crate::storage::{
    ArchiveOutcome, ArchiveStore, ExpiryPredicate, SampleStore, SampleStream, SummaryStore,
    TimeRange, SCAN_PAGE_SIZE,
};
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Config, Connection, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const SCHEMA_SQL: &str = r#"
    CREATE SEQUENCE IF NOT EXISTS sample_sequence START 1;
    CREATE TABLE IF NOT EXISTS samples (
        sequence_id BIGINT PRIMARY KEY,
        timestamp_us BIGINT NOT NULL,
        accel_x DOUBLE NOT NULL,
        accel_y DOUBLE NOT NULL,
        accel_z DOUBLE NOT NULL,
        temperature DOUBLE NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp_us);
    CREATE TABLE IF NOT EXISTS summary_buckets (
        minute_start_us BIGINT NOT NULL,
        avg_accel_magnitude DOUBLE NOT NULL,
        avg_temperature DOUBLE NOT NULL,
        sample_count BIGINT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_summary_minute ON summary_buckets(minute_start_us);
"#;

const SAMPLE_COLUMNS: &str =
    "sequence_id, timestamp_us, accel_x, accel_y, accel_z, temperature";

/// DuckDB-based storage backend.
///
/// Raw samples and summary buckets share one database so that the archive
/// unit commits both tables in a single transaction.
#[derive(Clone)]
pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Opens (or creates) a database file. `:memory:` gives a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && path != Path::new(":memory:") {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(path, Config::default())
            .map_err(|e| Error::duckdb("open database", e))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::duckdb("create tables", e))?;

        debug!(path = %path.display(), "opened duckdb sample store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn sample_from_row(row: &Row<'_>) -> duckdb::Result<(i64, i64, f64, f64, f64, f64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn build_sample(raw: (i64, i64, f64, f64, f64, f64)) -> Result<Sample> {
        let (sequence_id, timestamp_us, accel_x, accel_y, accel_z, temperature) = raw;
        Ok(Sample {
            sequence_id,
            timestamp: from_micros(timestamp_us)?,
            accel_x,
            accel_y,
            accel_z,
            temperature,
        })
    }

    fn query_samples(
        conn: &Connection,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<Sample>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::duckdb("prepare sample query", e))?;
        let rows = stmt
            .query_map(params, Self::sample_from_row)
            .map_err(|e| Error::duckdb("query samples", e))?;

        let mut samples = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| Error::duckdb("read sample row", e))?;
            samples.push(Self::build_sample(raw)?);
        }
        Ok(samples)
    }

    /// One page of the ordered scan strictly after `cursor`.
    fn read_page(conn: &Connection, cursor: Option<(i64, i64)>) -> Result<Vec<Sample>> {
        let limit = SCAN_PAGE_SIZE as i64;
        match cursor {
            None => Self::query_samples(
                conn,
                &format!(
                    "SELECT {SAMPLE_COLUMNS} FROM samples \
                     ORDER BY timestamp_us ASC, sequence_id ASC LIMIT ?"
                ),
                &[&limit],
            ),
            Some((ts, seq)) => Self::query_samples(
                conn,
                &format!(
                    "SELECT {SAMPLE_COLUMNS} FROM samples \
                     WHERE timestamp_us > ? OR (timestamp_us = ? AND sequence_id > ?) \
                     ORDER BY timestamp_us ASC, sequence_id ASC LIMIT ?"
                ),
                &[&ts, &ts, &seq, &limit],
            ),
        }
    }

    fn read_bucket(conn: &Connection, minute_start_us: i64) -> Result<Option<SummaryBucket>> {
        let mut stmt = conn
            .prepare(
                "SELECT avg_accel_magnitude, avg_temperature, sample_count \
                 FROM summary_buckets WHERE minute_start_us = ?",
            )
            .map_err(|e| Error::duckdb("prepare bucket lookup", e))?;
        let mut rows = stmt
            .query(params![minute_start_us])
            .map_err(|e| Error::duckdb("lookup bucket", e))?;

        match rows.next().map_err(|e| Error::duckdb("read bucket row", e))? {
            Some(row) => {
                let count: i64 = row.get(2)?;
                Ok(Some(SummaryBucket {
                    minute_start: from_micros(minute_start_us)?,
                    avg_accel_magnitude: row.get(0)?,
                    avg_temperature: row.get(1)?,
                    sample_count: u64::try_from(count).unwrap_or(0),
                }))
            }
            None => Ok(None),
        }
    }

    /// Inserts a bucket or folds it into the stored bucket for its minute.
    fn upsert_bucket(conn: &Connection, bucket: &SummaryBucket) -> Result<()> {
        let minute_start_us = to_micros(bucket.minute_start);
        match Self::read_bucket(conn, minute_start_us)? {
            Some(existing) => {
                let merged = existing.merge(bucket);
                conn.execute(
                    "UPDATE summary_buckets \
                     SET avg_accel_magnitude = ?, avg_temperature = ?, sample_count = ? \
                     WHERE minute_start_us = ?",
                    params![
                        merged.avg_accel_magnitude,
                        merged.avg_temperature,
                        merged.sample_count as i64,
                        minute_start_us,
                    ],
                )
                .map_err(|e| Error::duckdb("merge summary bucket", e))?;
            }
            None => {
                conn.execute(
                    "INSERT INTO summary_buckets \
                     (minute_start_us, avg_accel_magnitude, avg_temperature, sample_count) \
                     VALUES (?, ?, ?, ?)",
                    params![
                        minute_start_us,
                        bucket.avg_accel_magnitude,
                        bucket.avg_temperature,
                        bucket.sample_count as i64,
                    ],
                )
                .map_err(|e| Error::duckdb("insert summary bucket", e))?;
            }
        }
        Ok(())
    }

    fn delete_matching(conn: &Connection, predicate: ExpiryPredicate) -> Result<u64> {
        let through_us = to_micros(predicate.through);
        let removed = match predicate.max_sequence_id {
            Some(max_seq) => conn.execute(
                "DELETE FROM samples WHERE timestamp_us <= ? AND sequence_id <= ?",
                params![through_us, max_seq],
            ),
            None => conn.execute(
                "DELETE FROM samples WHERE timestamp_us <= ?",
                params![through_us],
            ),
        }
        .map_err(|e| Error::duckdb("delete expired samples", e))?;
        Ok(removed as u64)
    }
}

#[async_trait]
impl SampleStore for DuckDbBackend {
    async fn insert(&self, sample: NewSample) -> Result<i64> {
        let conn = self.conn.lock().await;
        let sequence_id: i64 = conn
            .query_row("SELECT nextval('sample_sequence')", params![], |row| row.get(0))
            .map_err(|e| Error::duckdb("allocate sequence id", e))?;

        conn.execute(
            &format!("INSERT INTO samples ({SAMPLE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"),
            params![
                sequence_id,
                to_micros(sample.timestamp),
                sample.accel_x,
                sample.accel_y,
                sample.accel_z,
                sample.temperature,
            ],
        )
        .map_err(|e| Error::duckdb("insert sample", e))?;

        Ok(sequence_id)
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT count(*) FROM samples", params![], |row| row.get(0))
            .map_err(|e| Error::duckdb("count samples", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn scan_ordered_by_timestamp(&self) -> SampleStream<'_> {
        Box::pin(try_stream! {
            let mut cursor = None;
            loop {
                let page = {
                    let conn = self.conn.lock().await;
                    Self::read_page(&conn, cursor)?
                };
                let exhausted = page.len() < SCAN_PAGE_SIZE;
                if let Some(last) = page.last() {
                    cursor = Some((to_micros(last.timestamp), last.sequence_id));
                }
                for sample in page {
                    yield sample;
                }
                if exhausted {
                    break;
                }
            }
        })
    }

    async fn delete_where(&self, predicate: ExpiryPredicate) -> Result<u64> {
        let conn = self.conn.lock().await;
        Self::delete_matching(&conn, predicate)
    }

    async fn timestamp_at_ordinal(&self, ordinal: u64) -> Result<Option<DateTime<Utc>>> {
        if ordinal == 0 {
            return Ok(None);
        }
        let offset = i64::try_from(ordinal - 1)
            .map_err(|_| Error::BoundaryUnresolvable { ordinal, population: 0 })?;

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT timestamp_us FROM samples \
                 ORDER BY timestamp_us ASC, sequence_id ASC LIMIT 1 OFFSET ?",
            )
            .map_err(|e| Error::duckdb("prepare ordinal lookup", e))?;
        let mut rows = stmt
            .query(params![offset])
            .map_err(|e| Error::duckdb("ordinal lookup", e))?;

        match rows.next().map_err(|e| Error::duckdb("read ordinal row", e))? {
            Some(row) => Ok(Some(from_micros(row.get(0)?)?)),
            None => Ok(None),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Sample>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn.lock().await;
        Self::query_samples(
            &conn,
            &format!("SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY sequence_id DESC LIMIT ?"),
            &[&limit],
        )
    }

    async fn time_range(&self) -> Result<Option<TimeRange>> {
        let conn = self.conn.lock().await;
        let (oldest, newest): (Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT min(timestamp_us), max(timestamp_us) FROM samples",
                params![],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::duckdb("read time range", e))?;

        match (oldest, newest) {
            (Some(oldest), Some(newest)) => Ok(Some(TimeRange {
                oldest: from_micros(oldest)?,
                newest: from_micros(newest)?,
            })),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl SummaryStore for DuckDbBackend {
    async fn insert_bucket(&self, bucket: SummaryBucket) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| Error::duckdb("start transaction", e))?;
        Self::upsert_bucket(&tx, &bucket)?;
        tx.commit()
            .map_err(|e| Error::duckdb("commit transaction", e))
    }

    async fn buckets(&self) -> Result<Vec<SummaryBucket>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT minute_start_us, avg_accel_magnitude, avg_temperature, sample_count \
                 FROM summary_buckets ORDER BY minute_start_us ASC",
            )
            .map_err(|e| Error::duckdb("prepare bucket scan", e))?;
        let rows = stmt
            .query_map(params![], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| Error::duckdb("scan buckets", e))?;

        let mut buckets = Vec::new();
        for row in rows {
            let (minute_start_us, avg_accel_magnitude, avg_temperature, count) =
                row.map_err(|e| Error::duckdb("read bucket row", e))?;
            buckets.push(SummaryBucket {
                minute_start: from_micros(minute_start_us)?,
                avg_accel_magnitude,
                avg_temperature,
                sample_count: u64::try_from(count).unwrap_or(0),
            });
        }
        Ok(buckets)
    }

    async fn bucket_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT count(*) FROM summary_buckets", params![], |row| row.get(0))
            .map_err(|e| Error::duckdb("count buckets", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl ArchiveStore for DuckDbBackend {
    async fn archive_through(
        &self,
        through: DateTime<Utc>,
        mut aggregator: MinuteAggregator,
    ) -> Result<ArchiveOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| Error::duckdb("start archive transaction", e))?;

        let expired = Self::query_samples(
            &tx,
            &format!(
                "SELECT {SAMPLE_COLUMNS} FROM samples WHERE timestamp_us <= ? \
                 ORDER BY timestamp_us ASC, sequence_id ASC"
            ),
            &[&to_micros(through)],
        )?;
        for sample in &expired {
            aggregator.observe(sample);
        }

        let Some(max_sequence_id) = aggregator.max_sequence_id() else {
            return Ok(ArchiveOutcome {
                buckets: Vec::new(),
                rows_removed: 0,
            });
        };
        let summarized = aggregator.observed();
        let buckets = aggregator.finish();

        for bucket in &buckets {
            Self::upsert_bucket(&tx, bucket)?;
        }

        let predicate = ExpiryPredicate::through(through).pinned_to(max_sequence_id);
        let rows_removed = Self::delete_matching(&tx, predicate)?;
        if rows_removed != summarized {
            // Dropping the transaction rolls back the bucket writes too.
            return Err(Error::ArchiveMismatch {
                summarized,
                removed: rows_removed,
            });
        }

        tx.commit()
            .map_err(|e| Error::duckdb("commit archive transaction", e))?;

        Ok(ArchiveOutcome {
            buckets,
            rows_removed,
        })
    }
}
