//! CSV persistence for the event log and the users table
//!
//! Files are written to a temporary sibling and only renamed onto the final
//! path by [`AtomicCsvWriter::finish`]. A writer dropped before `finish`
//! removes its temporary file, so a file at the final path is always complete.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{FunnelError, FunnelResult};
use crate::types::{format_timestamp, parse_timestamp, EventRow, Subscription, User};

/// A record that maps onto one CSV line
pub trait CsvRow: Sized {
    const HEADER: &'static str;

    fn write_csv<W: Write>(&self, out: &mut W) -> std::io::Result<()>;

    fn from_fields(fields: &[&str]) -> Result<Self, String>;
}

fn expect_fields<'a>(fields: &'a [&'a str], count: usize) -> Result<&'a [&'a str], String> {
    if fields.len() != count {
        return Err(format!("expected {} fields, found {}", count, fields.len()));
    }
    Ok(fields)
}

fn parse_field<T>(name: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| format!("invalid {} '{}': {}", name, value, e))
}

impl CsvRow for EventRow {
    const HEADER: &'static str = "user_id,channel,device,event_type,timestamp";

    fn write_csv<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(
            out,
            "{},{},{},{},{}",
            self.user_id,
            self.channel,
            self.device,
            self.event_type,
            format_timestamp(&self.timestamp)
        )
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let f = expect_fields(fields, 5)?;
        Ok(Self {
            user_id: parse_field("user_id", f[0])?,
            channel: parse_field("channel", f[1])?,
            device: parse_field("device", f[2])?,
            event_type: parse_field("event_type", f[3])?,
            timestamp: parse_timestamp(f[4])
                .map_err(|e| format!("invalid timestamp '{}': {}", f[4], e))?,
        })
    }
}

impl CsvRow for User {
    const HEADER: &'static str = "user_id,channel,device,signup_ts";

    fn write_csv<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(
            out,
            "{},{},{},{}",
            self.id,
            self.channel,
            self.device,
            format_timestamp(&self.signup_at)
        )
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let f = expect_fields(fields, 4)?;
        Ok(Self {
            id: parse_field("user_id", f[0])?,
            channel: parse_field("channel", f[1])?,
            device: parse_field("device", f[2])?,
            signup_at: parse_timestamp(f[3])
                .map_err(|e| format!("invalid signup_ts '{}': {}", f[3], e))?,
        })
    }
}

impl CsvRow for Subscription {
    const HEADER: &'static str = "user_id,plan,mrr,subscription_ts,cancelled_ts";

    fn write_csv<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(
            out,
            "{},{},{:.2},{},{}",
            self.user_id,
            self.plan,
            self.mrr,
            format_timestamp(&self.started_at),
            self.cancelled_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default()
        )
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let f = expect_fields(fields, 5)?;
        let cancelled_at = match f[4] {
            "" => None,
            value => Some(
                parse_timestamp(value)
                    .map_err(|e| format!("invalid cancelled_ts '{}': {}", value, e))?,
            ),
        };
        Ok(Self {
            user_id: parse_field("user_id", f[0])?,
            plan: parse_field("plan", f[1])?,
            mrr: parse_field("mrr", f[2])?,
            started_at: parse_timestamp(f[3])
                .map_err(|e| format!("invalid subscription_ts '{}': {}", f[3], e))?,
            cancelled_at,
        })
    }
}

/// Streams rows into a temporary file and atomically publishes it on `finish`
pub struct AtomicCsvWriter<T: CsvRow> {
    path: PathBuf,
    out: BufWriter<NamedTempFile>,
    rows: u64,
    _row: PhantomData<T>,
}

impl<T: CsvRow> AtomicCsvWriter<T> {
    /// Open a temporary file next to `path` and write the header
    pub fn create(path: impl AsRef<Path>) -> FunnelResult<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let temp = NamedTempFile::new_in(&dir)?;
        debug!(
            "Writing {} via temporary file {}",
            path.display(),
            temp.path().display()
        );

        let mut out = BufWriter::new(temp);
        writeln!(out, "{}", T::HEADER)?;

        Ok(Self {
            path,
            out,
            rows: 0,
            _row: PhantomData,
        })
    }

    pub fn write_row(&mut self, row: &T) -> FunnelResult<()> {
        row.write_csv(&mut self.out)?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, header excluded
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flush and sync the temporary file without publishing it
    pub fn seal(self) -> FunnelResult<SealedCsv> {
        let temp = self
            .out
            .into_inner()
            .map_err(|e| FunnelError::Io(e.into_error()))?;
        temp.as_file().sync_all()?;

        Ok(SealedCsv {
            path: self.path,
            temp,
            rows: self.rows,
        })
    }

    /// Flush, sync and rename onto the final path. Returns the row count.
    pub fn finish(self) -> FunnelResult<u64> {
        self.seal()?.persist()
    }
}

/// A complete, synced table that has not been renamed onto its final path yet
pub struct SealedCsv {
    path: PathBuf,
    temp: NamedTempFile,
    rows: u64,
}

impl SealedCsv {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Rename onto the final path. Returns the row count.
    pub fn persist(self) -> FunnelResult<u64> {
        let Self { path, temp, rows } = self;
        temp.persist(&path).map_err(|e| FunnelError::Persist {
            path: path.clone(),
            source: e.error,
        })?;

        debug!("Finalized {} ({} rows)", path.display(), rows);
        Ok(rows)
    }
}

/// Publish sealed tables in order.
///
/// If one rename fails, the tables already published by this call are
/// removed again, so a set of companion files is never left half replaced.
/// Unpublished temporary files are dropped and cleaned up.
pub fn persist_all(tables: Vec<SealedCsv>) -> FunnelResult<Vec<u64>> {
    let mut published: Vec<PathBuf> = Vec::with_capacity(tables.len());
    let mut counts = Vec::with_capacity(tables.len());

    for table in tables {
        let path = table.path.clone();
        match table.persist() {
            Ok(rows) => {
                published.push(path);
                counts.push(rows);
            }
            Err(err) => {
                for done in &published {
                    if let Err(remove_err) = std::fs::remove_file(done) {
                        warn!("Failed to roll back {}: {}", done.display(), remove_err);
                    }
                }
                return Err(err);
            }
        }
    }

    Ok(counts)
}

/// Write a complete table atomically
pub fn write_csv<'a, T, I>(path: impl AsRef<Path>, rows: I) -> FunnelResult<u64>
where
    T: CsvRow + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut writer = AtomicCsvWriter::create(path)?;
    for row in rows {
        writer.write_row(row)?;
    }
    writer.finish()
}

/// Read a table, checking the header and reporting bad rows by line number
pub fn read_csv<T: CsvRow>(path: impl AsRef<Path>) -> FunnelResult<Vec<T>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines.next().transpose()?.unwrap_or_default();
    if header.trim_end() != T::HEADER {
        return Err(FunnelError::Header {
            path: path.to_path_buf(),
            expected: T::HEADER,
            found: header,
        });
    }

    let mut rows = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        let row = T::from_fields(&fields).map_err(|message| FunnelError::MalformedRow {
            path: path.to_path_buf(),
            line: idx + 2,
            message,
        })?;
        rows.push(row);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, Device, EventType, Plan};
    use chrono::{TimeZone, Utc};

    fn sample_rows() -> Vec<EventRow> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        vec![
            EventRow {
                user_id: 1,
                channel: Channel::PaidSearch,
                device: Device::Mobile,
                event_type: EventType::Signup,
                timestamp: t0,
            },
            EventRow {
                user_id: 1,
                channel: Channel::PaidSearch,
                device: Device::Mobile,
                event_type: EventType::OnboardingStart,
                timestamp: t0 + chrono::Duration::minutes(12),
            },
        ]
    }

    #[test]
    fn test_write_then_read_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        let rows = sample_rows();

        let written = write_csv(&path, &rows).unwrap();
        assert_eq!(written, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "user_id,channel,device,event_type,timestamp\n\
             1,paid_search,mobile,signup,2024-01-01T09:00:00Z\n\
             1,paid_search,mobile,onboarding_start,2024-01-01T09:12:00Z\n"
        );

        let read: Vec<EventRow> = read_csv(&path).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn test_unfinished_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");

        {
            let mut writer = AtomicCsvWriter::<EventRow>::create(&path).unwrap();
            for row in sample_rows() {
                writer.write_row(&row).unwrap();
            }
            assert_eq!(writer.rows_written(), 2);
        }

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_finish_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "stale").unwrap();

        write_csv(&path, &sample_rows()).unwrap();
        let read: Vec<EventRow> = read_csv(&path).unwrap();
        assert_eq!(read.len(), 2);
    }

    #[test]
    fn test_wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "id,kind\n1,signup\n").unwrap();

        let err = read_csv::<EventRow>(&path).unwrap_err();
        assert!(matches!(err, FunnelError::Header { .. }));
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(
            &path,
            "user_id,channel,device,event_type,timestamp\n\
             1,organic,web,signup,2024-01-01T00:00:00Z\n\
             2,organic,tablet,signup,2024-01-01T00:00:00Z\n",
        )
        .unwrap();

        match read_csv::<EventRow>(&path).unwrap_err() {
            FunnelError::MalformedRow { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("tablet"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_users_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        let users = vec![User {
            id: 7,
            channel: Channel::Referral,
            device: Device::Web,
            signup_at: Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 0).unwrap(),
        }];

        write_csv(&path, &users).unwrap();
        let read: Vec<User> = read_csv(&path).unwrap();
        assert_eq!(read, users);
    }

    #[test]
    fn test_subscriptions_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.csv");
        let started = Utc.with_ymd_and_hms(2024, 2, 1, 10, 30, 0).unwrap();
        let subscriptions = vec![
            Subscription {
                user_id: 3,
                plan: Plan::Pro,
                mrr: 79.0,
                started_at: started,
                cancelled_at: None,
            },
            Subscription {
                user_id: 8,
                plan: Plan::Starter,
                mrr: 29.0,
                started_at: started,
                cancelled_at: Some(started + chrono::Duration::days(45)),
            },
        ];

        write_csv(&path, &subscriptions).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "user_id,plan,mrr,subscription_ts,cancelled_ts\n\
             3,pro,79.00,2024-02-01T10:30:00Z,\n\
             8,starter,29.00,2024-02-01T10:30:00Z,2024-03-17T10:30:00Z\n"
        );

        let read: Vec<Subscription> = read_csv(&path).unwrap();
        assert_eq!(read, subscriptions);
    }

    #[test]
    fn test_sealed_table_is_invisible_until_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");

        let mut writer = AtomicCsvWriter::<EventRow>::create(&path).unwrap();
        for row in sample_rows() {
            writer.write_row(&row).unwrap();
        }
        let sealed = writer.seal().unwrap();
        assert_eq!(sealed.rows(), 2);
        assert!(!path.exists());

        assert_eq!(sealed.persist().unwrap(), 2);
        assert_eq!(read_csv::<EventRow>(&path).unwrap(), sample_rows());
    }

    #[test]
    fn test_failed_publish_rolls_back_companions() {
        let dir = tempfile::tempdir().unwrap();
        let users_path = dir.path().join("users.csv");
        let events_path = dir.path().join("events.csv");
        // A directory in the way makes the second rename fail
        std::fs::create_dir(&events_path).unwrap();

        let users = AtomicCsvWriter::<User>::create(&users_path).unwrap();
        let mut events = AtomicCsvWriter::<EventRow>::create(&events_path).unwrap();
        events.write_row(&sample_rows()[0]).unwrap();

        let err = persist_all(vec![users.seal().unwrap(), events.seal().unwrap()]).unwrap_err();
        assert!(matches!(err, FunnelError::Persist { .. }));
        assert!(!users_path.exists());
        assert!(events_path.is_dir());
        // Only the blocking directory is left
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
