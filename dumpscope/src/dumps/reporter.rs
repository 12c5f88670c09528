//! Rendering of live-resource dumps
//!
//! The reporter works on a ledger snapshot, never on the live ledger, so the
//! I/O it performs cannot block or recurse into tracked resources.

use chrono::{DateTime, Local};
use log::debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use super::DumpFilter;
use crate::ledger::Ledger;
use crate::output::Sink;

/// Total size at the last emitted dump of one resource kind
///
/// Shared by periodic and on-demand dumps of that kind. The lock is held for
/// the whole report, so two dumps of one kind never interleave their output.
#[derive(Debug, Default)]
pub struct DumpThrottle {
    last_total: Mutex<u64>,
}

impl DumpThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.last_total.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn last_total(&self) -> u64 {
        *self.lock()
    }
}

/// Local time in a `Tue Oct 19 14:03:11 +02:00 2026` layout
#[must_use]
pub fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%a %b %d %H:%M:%S %:z %Y").to_string()
}

/// Dump the records of `snapshot` that pass `filter`.
///
/// Returns true if at least one record was printed; only then is the
/// summary written and the throttle advanced to the snapshot total.
pub fn report<D>(
    snapshot: &Ledger<D>,
    filter: &DumpFilter,
    throttle: &DumpThrottle,
    sink: &dyn Sink,
    now: SystemTime,
) -> bool {
    let mut last_total = throttle.lock();
    let total = snapshot.total_size();

    if !filter.should_dump(total, *last_total) {
        debug!("dump suppressed: total={total} last={}", *last_total);
        return false;
    }

    let mut printed_count = 0usize;
    let mut printed_size = 0u64;

    for record in snapshot.records_by_age() {
        let Some(frames) = filter.accepts(record, now) else {
            continue;
        };

        sink.write_line(&format!("Allocated {} bytes at {}", record.size, record.handle));
        sink.write_line(&format!("Timestamp: {}", format_timestamp(record.created_at)));
        sink.write_line("Allocated at:");
        for frame in &frames {
            sink.write_line(&format!("\t{frame}"));
        }

        printed_count += 1;
        printed_size += record.size;
    }

    if printed_count == 0 {
        return false;
    }

    sink.write_line(&format!(
        "Printed {printed_count} of {} allocations with {printed_size} bytes (of {total} bytes allocated in total).",
        snapshot.len()
    ));
    *last_total = total;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Handle;
    use crate::ledger::{CapturedStack, ResourceRecord, StackFrame};
    use crate::options::OptionsLine;
    use crate::output::MemorySink;
    use std::sync::Arc;

    fn ledger(records: &[(u64, u64, &str)]) -> Ledger {
        let mut ledger = Ledger::new();
        for &(handle, size, frame) in records {
            let stack = CapturedStack::from_frames(vec![StackFrame::new(frame, Some("src/app.rs"), Some(7))]);
            ledger.add(ResourceRecord::new(Handle(handle), size, Arc::new(stack), ())).unwrap();
        }
        ledger
    }

    fn filter(line: &str) -> DumpFilter {
        DumpFilter::from_options(&OptionsLine::parse(line))
    }

    #[test]
    fn test_report_renders_matching_records() {
        let snapshot = ledger(&[(0x1000, 570, "app::alloc_small"), (0x2000, 750, "app::alloc_large")]);
        let throttle = DumpThrottle::new();
        let sink = MemorySink::new();

        assert!(report(&snapshot, &filter("mustContain=small"), &throttle, &sink, SystemTime::now()));

        let lines = sink.lines();
        assert_eq!(lines[0], "Allocated 570 bytes at 0x1000");
        assert!(lines[1].starts_with("Timestamp: "));
        assert_eq!(lines[2], "Allocated at:");
        assert_eq!(lines[3], "\tapp::alloc_small (src/app.rs:7)");
        assert_eq!(
            lines[4],
            "Printed 1 of 2 allocations with 570 bytes (of 1320 bytes allocated in total)."
        );
        assert_eq!(throttle.last_total(), 1320);
    }

    #[test]
    fn test_nothing_printed_leaves_throttle() {
        let snapshot = ledger(&[(0x1000, 570, "app::alloc_small")]);
        let throttle = DumpThrottle::new();
        let sink = MemorySink::new();

        assert!(!report(&snapshot, &filter("mustContain=nothing"), &throttle, &sink, SystemTime::now()));
        assert!(sink.lines().is_empty());
        assert_eq!(throttle.last_total(), 0);
    }

    #[test]
    fn test_throttle_suppresses_second_dump() {
        let snapshot = ledger(&[(0x1000, 100, "app::f")]);
        let throttle = DumpThrottle::new();
        let sink = MemorySink::new();
        let f = filter("minPercentage=300");

        assert!(report(&snapshot, &f, &throttle, &sink, SystemTime::now()));
        assert_eq!(throttle.last_total(), 100);

        let grown = ledger(&[(0x1000, 100, "app::f"), (0x2000, 150, "app::g")]);
        assert!(!report(&grown, &f, &throttle, &sink, SystemTime::now()));

        let grown = ledger(&[(0x1000, 100, "app::f"), (0x2000, 201, "app::g")]);
        assert!(report(&grown, &f, &throttle, &sink, SystemTime::now()));
        assert_eq!(throttle.last_total(), 301);
    }

    #[test]
    fn test_empty_snapshot_prints_nothing() {
        let throttle = DumpThrottle::new();
        let sink = MemorySink::new();
        assert!(!report(&Ledger::<()>::new(), &DumpFilter::default(), &throttle, &sink, SystemTime::now()));
        assert!(sink.lines().is_empty());
    }
}
