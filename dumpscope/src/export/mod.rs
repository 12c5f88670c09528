//! Snapshot export
//!
//! Writes a ledger snapshot as JSON for offline analysis:
//!
//! ```json
//! {"total_size": 1320, "record_count": 2, "records": [
//!   {"handle": "0x2000", "size": 570, "created_at": "2026-10-19T12:00:00+00:00",
//!    "frames": ["app::alloc_small (app.rs:10)"]}
//! ]}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::domain::ExportError;
use crate::ledger::{Ledger, ResourceRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRecord {
    /// Hex rendering of the handle
    pub handle: String,
    pub size: u64,
    /// RFC 3339, UTC
    pub created_at: String,
    pub frames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedSnapshot {
    pub total_size: u64,
    pub record_count: usize,
    pub records: Vec<ExportedRecord>,
}

impl ExportedSnapshot {
    /// Records are listed oldest first.
    #[must_use]
    pub fn from_ledger<D>(snapshot: &Ledger<D>) -> Self {
        Self {
            total_size: snapshot.total_size(),
            record_count: snapshot.len(),
            records: snapshot.records_by_age().into_iter().map(ExportedRecord::from_record).collect(),
        }
    }
}

impl ExportedRecord {
    fn from_record<D>(record: &ResourceRecord<D>) -> Self {
        Self {
            handle: record.handle.to_string(),
            size: record.size,
            created_at: DateTime::<Utc>::from(record.created_at).to_rfc3339_opts(SecondsFormat::Millis, false),
            frames: record.stack.frames().iter().map(ToString::to_string).collect(),
        }
    }
}

/// JSON exporter for ledger snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotExporter {
    pretty: bool,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Serialize `snapshot` into `writer`.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn export<D, W: Write>(&self, snapshot: &Ledger<D>, mut writer: W) -> Result<(), ExportError> {
        let exported = ExportedSnapshot::from_ledger(snapshot);
        if self.pretty {
            serde_json::to_writer_pretty(&mut writer, &exported)?;
        } else {
            serde_json::to_writer(&mut writer, &exported)?;
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Handle;
    use crate::ledger::{CapturedStack, StackFrame};
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_export_snapshot() {
        let mut ledger = Ledger::new();
        let stack = Arc::new(CapturedStack::from_frames(vec![StackFrame::new("app::alloc", Some("app.rs"), Some(3))]));
        let record = ResourceRecord::new(Handle(0x2000), 570, stack, ())
            .with_created_at(UNIX_EPOCH + Duration::from_secs(1_000_000_000));
        ledger.add(record).unwrap();

        let mut out = Vec::new();
        SnapshotExporter::new().export(&ledger, &mut out).unwrap();

        let parsed: ExportedSnapshot = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.total_size, 570);
        assert_eq!(parsed.record_count, 1);
        assert_eq!(parsed.records[0].handle, "0x2000");
        assert_eq!(parsed.records[0].created_at, "2001-09-09T01:46:40.000+00:00");
        assert_eq!(parsed.records[0].frames, vec!["app::alloc (app.rs:3)"]);
    }
}
