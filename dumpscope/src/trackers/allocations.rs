//! Native allocation tracking
//!
//! Probe protocol for one allocation call site:
//!
//! 1. [`AllocationTracker::log_size`] stages the requested size
//! 2. [`AllocationTracker::log_ptr`] stages the previous pointer (realloc only)
//! 3. [`AllocationTracker::log_result`] finalizes with the returned pointer
//!
//! Frees go straight to [`AllocationTracker::log_free`]. Every probe returns
//! its argument so it can wrap the original value at the call site.

use log::{debug, warn};
use std::sync::Arc;
use std::time::SystemTime;

use super::{configure_in, CommandConfig, Tracker, TrackerEnv, ALLOCATION_LOGGER};
use crate::domain::{Handle, LedgerError, SlotValue};
use crate::dumps::{report, DumpDispatcher, DumpFilter, DumpScheduler, DumpThrottle, FILTER_OPTIONS};
use crate::ledger::{Ledger, ResourceLedger, ResourceRecord};
use crate::options::{CommandDescriptor, OptionsLine, LOG_DEST, LOG_DEST_HELP, OUTPUT_OPTIONS, SCHEDULER_OPTIONS};
use dumpscope_common::{ALLOC_OLD_PTR_SLOT, ALLOC_SIZE_SLOT};

pub const DUMP_COMMAND: &str = "nativeAllocations";
pub const TRACE_COMMAND: &str = "traceNativeAllocations";

/// Name used in periodic dump progress lines
const PERIODIC_DUMP_NAME: &str = "Native memory allocation";

pub struct AllocationTracker {
    env: TrackerEnv,
    ledger: ResourceLedger,
    throttle: DumpThrottle,
    dump_command: Arc<CommandDescriptor>,
    trace: CommandConfig,
}

impl AllocationTracker {
    #[must_use]
    pub fn new(env: TrackerEnv) -> Self {
        let mut dump_command = CommandDescriptor::new(
            DUMP_COMMAND,
            "Dump the currently live native memory allocations.",
            FILTER_OPTIONS,
        );
        dump_command.add_option(LOG_DEST, LOG_DEST_HELP);

        let mut trace_command =
            CommandDescriptor::derive(&dump_command, TRACE_COMMAND, "Traces native memory allocations.", &[]);
        trace_command.add_options(OUTPUT_OPTIONS);
        trace_command.add_options(SCHEDULER_OPTIONS);

        Self {
            env,
            ledger: ResourceLedger::new(),
            throttle: DumpThrottle::new(),
            dump_command: Arc::new(dump_command),
            trace: CommandConfig::new(trace_command),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.trace.is_enabled()
    }

    #[must_use]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    #[must_use]
    pub fn throttle(&self) -> &DumpThrottle {
        &self.throttle
    }

    #[must_use]
    pub fn snapshot(&self) -> Ledger {
        self.ledger.snapshot()
    }

    // ========================================================================
    // Probes
    // ========================================================================

    pub fn log_size(&self, size: u64) -> u64 {
        let value = i64::try_from(size).map_or(SlotValue::Ref(size), SlotValue::Int);
        self.stage(ALLOC_SIZE_SLOT, value);
        size
    }

    pub fn log_ptr(&self, ptr: Handle) -> Handle {
        self.stage(ALLOC_OLD_PTR_SLOT, SlotValue::from(ptr));
        ptr
    }

    pub fn log_result(&self, result: Handle) -> Handle {
        let values = match self.env.slots.finalize(ALLOCATION_LOGGER) {
            Ok(values) => values,
            Err(e) => {
                warn!("allocation probe: {e}");
                return result;
            }
        };

        let Some(size) = values.get(ALLOC_SIZE_SLOT).and_then(SlotValue::as_u64) else {
            debug!("allocation result {result} without staged size");
            return result;
        };
        let old = values.get(ALLOC_OLD_PTR_SLOT).and_then(SlotValue::as_u64).map_or(Handle::NULL, Handle);

        if old.is_null() {
            self.record_malloc(result, size);
        } else {
            self.record_realloc(old, result, size);
        }
        result
    }

    pub fn log_free(&self, ptr: Handle) -> Handle {
        if ptr.is_null() {
            return ptr;
        }
        if let Err(e) = self.ledger.remove(ptr) {
            warn!("free: {e}");
        }
        ptr
    }

    fn stage(&self, position: usize, value: SlotValue) {
        if let Err(e) = self.env.slots.stage(ALLOCATION_LOGGER, position, value) {
            warn!("allocation probe: {e}");
        }
    }

    fn record_malloc(&self, result: Handle, size: u64) {
        if result.is_null() {
            debug!("failed allocation of {size} bytes");
            return;
        }
        let record = ResourceRecord::new(result, size, self.env.stacks.capture(), ());
        if let Err(LedgerError::DuplicateHandle(handle)) = self.ledger.add(record.clone()) {
            warn!("allocation at already tracked {handle}, replacing record");
            self.ledger.replace(record);
        }
    }

    fn record_realloc(&self, old: Handle, result: Handle, size: u64) {
        if result.is_null() && size > 0 {
            debug!("failed reallocation of {old} to {size} bytes");
            return;
        }

        let stack = if size > 0 { self.env.stacks.capture() } else { Arc::default() };
        let record = ResourceRecord::new(result, size, stack, ());
        if let Err(LedgerError::DuplicateHandle(handle)) = self.ledger.reallocate(old, record.clone()) {
            warn!("reallocation to already tracked {handle}, replacing record");
            self.ledger.replace(record);
        }
    }

    // ========================================================================
    // Dumps
    // ========================================================================

    /// Dump live allocations as configured by `options`.
    pub fn dump(&self, options: &OptionsLine) -> bool {
        self.dump_at(options, SystemTime::now())
    }

    /// Dump with an explicit reference time for the age filters.
    pub fn dump_at(&self, options: &OptionsLine, now: SystemTime) -> bool {
        let sink = self.env.sinks.resolve(options);
        if !sink.is_enabled() {
            return false;
        }
        let filter = DumpFilter::from_options(options);
        report(&self.ledger.snapshot(), &filter, &self.throttle, sink.as_ref(), now)
    }
}

impl Tracker for AllocationTracker {
    fn commands(&self) -> Vec<Arc<CommandDescriptor>> {
        vec![Arc::clone(self.trace.command())]
    }

    fn configure(&self, command: &str, line: &str) -> bool {
        configure_in(&[&self.trace], command, line)
    }

    fn register_dumps(self: Arc<Self>, dispatcher: &DumpDispatcher) {
        let tracker = Arc::clone(&self);
        dispatcher.register(Arc::clone(&self.dump_command), Arc::new(move |options: &OptionsLine| tracker.dump(options)));
        let tracker = Arc::clone(&self);
        dispatcher.register(Arc::clone(self.trace.command()), Arc::new(move |options: &OptionsLine| tracker.dump(options)));
    }

    fn start(self: Arc<Self>, scheduler: &DumpScheduler) {
        if !self.trace.is_enabled() {
            return;
        }
        let options = self.trace.options();
        let sink = self.env.sinks.resolve(&options);
        let tracker = Arc::clone(&self);
        let dump_options = options.clone();
        let _ = scheduler.schedule(PERIODIC_DUMP_NAME, &options, sink, move || tracker.dump(&dump_options));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BacktraceSource;
    use crate::output::{MemorySink, SinkRegistry};

    fn tracker() -> (AllocationTracker, Arc<MemorySink>) {
        let out = Arc::new(MemorySink::new());
        let err = Arc::new(MemorySink::new());
        let sinks = Arc::new(SinkRegistry::with_console(out.clone(), err));
        (AllocationTracker::new(TrackerEnv::new(sinks, Arc::new(BacktraceSource::new(8)))), out)
    }

    fn malloc(tracker: &AllocationTracker, size: u64, result: u64) {
        tracker.log_size(size);
        tracker.log_result(Handle(result));
    }

    fn realloc(tracker: &AllocationTracker, old: u64, size: u64, result: u64) {
        tracker.log_size(size);
        tracker.log_ptr(Handle(old));
        tracker.log_result(Handle(result));
    }

    #[test]
    fn test_call_sequence_from_allocation_test() {
        let (tracker, _out) = tracker();
        malloc(&tracker, 4027, 0x1000);
        realloc(&tracker, 0x1000, 0, 0);
        realloc(&tracker, 0, 570, 0x2000);
        malloc(&tracker, 128, 0x3000);
        tracker.log_free(Handle(0x3000));
        malloc(&tracker, 750, 0x3000);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.total_size(), 1320);
        assert_eq!(snapshot.get(Handle(0x2000)).map(|r| r.size), Some(570));
    }

    #[test]
    fn test_failed_calls_leave_ledger_unchanged() {
        let (tracker, _out) = tracker();
        malloc(&tracker, 1 << 56, 0);
        realloc(&tracker, 0, 1 << 56, 0);
        malloc(&tracker, 64, 0x10);
        realloc(&tracker, 0x10, 1 << 40, 0);

        assert_eq!(tracker.ledger().total_size(), 64);
        assert!(tracker.snapshot().contains(Handle(0x10)));
    }

    #[test]
    fn test_duplicate_and_unknown_are_corrected() {
        let (tracker, _out) = tracker();
        malloc(&tracker, 10, 0x10);
        malloc(&tracker, 30, 0x10);
        assert_eq!(tracker.ledger().total_size(), 30);

        tracker.log_free(Handle(0x99));
        tracker.log_free(Handle::NULL);
        assert_eq!(tracker.ledger().total_size(), 30);
    }

    #[test]
    fn test_result_without_size_is_ignored() {
        let (tracker, _out) = tracker();
        tracker.log_result(Handle(0x10));
        assert!(tracker.ledger().is_empty());
    }

    #[test]
    fn test_dump_to_none_emits_nothing() {
        let (tracker, out) = tracker();
        malloc(&tracker, 10, 0x10);
        assert!(!tracker.dump(&OptionsLine::parse("logDest=none")));
        assert!(tracker.dump(&OptionsLine::parse("logDest=stdout")));
        assert!(out.contains("Allocated 10 bytes at 0x10"));
    }

    #[test]
    fn test_commands() {
        let (tracker, _out) = tracker();
        let commands = tracker.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].has_option("dumpCount"));
        assert!(commands[0].has_option("mustContain"));
        assert!(commands[0].has_option("logWithStack"));
        assert!(tracker.dump_command.has_option("logDest"));
        assert!(!tracker.dump_command.has_option("dumpCount"));
    }
}
