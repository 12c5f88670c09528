//! Open file tracking
//!
//! Open probes stage the path and, for writable opens, the mode; the probe on
//! the returned handle finalizes the event. Records carry no size, only the
//! path, mode and opening stack.

use log::{debug, warn};
use std::sync::{Arc, PoisonError, RwLock};

use super::{configure_in, CommandConfig, Tracker, TrackerEnv, OPEN_FILE_LOGGER};
use crate::domain::{Handle, LedgerError, SlotValue};
use crate::dumps::{DumpDispatcher, DumpFilter, DumpScheduler};
use crate::ledger::{Ledger, ResourceLedger, ResourceRecord};
use crate::options::{
    CommandDescriptor, OptionsLine, LOG_DEST, LOG_DEST_HELP, MUST_CONTAIN, MUST_NOT_CONTAIN, OUTPUT_OPTIONS,
    SCHEDULER_OPTIONS,
};
use dumpscope_common::{FILE_MODE_SLOT, FILE_PATH_SLOT};

pub const DUMP_COMMAND: &str = "openFiles";
pub const TRACE_COMMAND: &str = "traceOpenFiles";
pub const UNKNOWN_FILE: &str = "<unknown file>";
pub const DEFAULT_MODE: &str = "r";

const PERIODIC_DUMP_NAME: &str = "Open files";

/// Host check whether a handle still refers to an open file
pub type LivenessCheck = Arc<dyn Fn(Handle) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDetail {
    pub path: String,
    pub mode: String,
}

pub struct OpenFileTracker {
    env: TrackerEnv,
    ledger: ResourceLedger<FileDetail>,
    dump_command: Arc<CommandDescriptor>,
    trace: CommandConfig,
    liveness: RwLock<Option<LivenessCheck>>,
}

impl OpenFileTracker {
    #[must_use]
    pub fn new(env: TrackerEnv) -> Self {
        let dump_command = CommandDescriptor::new(
            DUMP_COMMAND,
            "Dump the files currently opened.",
            &[
                (MUST_CONTAIN, "A regexp which must match the file name to be printed."),
                (MUST_NOT_CONTAIN, "A regexp which must not match the file name to be printed."),
                (LOG_DEST, LOG_DEST_HELP),
            ],
        );
        let mut trace_command = CommandDescriptor::derive(&dump_command, TRACE_COMMAND, "Traces opened files.", &[]);
        trace_command.add_options(OUTPUT_OPTIONS);
        trace_command.add_options(SCHEDULER_OPTIONS);

        Self {
            env,
            ledger: ResourceLedger::new(),
            dump_command: Arc::new(dump_command),
            trace: CommandConfig::new(trace_command),
            liveness: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.trace.is_enabled()
    }

    #[must_use]
    pub fn snapshot(&self) -> Ledger<FileDetail> {
        self.ledger.snapshot()
    }

    /// Install the check used to drop stale records before each dump
    pub fn set_liveness_check(&self, check: LivenessCheck) {
        *self.liveness.write().unwrap_or_else(PoisonError::into_inner) = Some(check);
    }

    // ========================================================================
    // Probes
    // ========================================================================

    pub fn log_path<'a>(&self, path: &'a str) -> &'a str {
        self.stage(FILE_PATH_SLOT, SlotValue::from(path));
        path
    }

    pub fn log_mode<'a>(&self, mode: &'a str) -> &'a str {
        self.stage(FILE_MODE_SLOT, SlotValue::from(mode));
        mode
    }

    pub fn log_opened(&self, handle: Handle) -> Handle {
        let values = match self.env.slots.finalize(OPEN_FILE_LOGGER) {
            Ok(values) => values,
            Err(e) => {
                warn!("open file probe: {e}");
                return handle;
            }
        };

        let Some(path) = values.get(FILE_PATH_SLOT).and_then(SlotValue::as_str) else {
            debug!("open of {handle} without staged path");
            return handle;
        };
        let mode = values.get(FILE_MODE_SLOT).and_then(SlotValue::as_str).unwrap_or(DEFAULT_MODE);

        let detail = FileDetail { path: path.to_string(), mode: mode.to_string() };
        let record = ResourceRecord::new(handle, 0, self.env.stacks.capture(), detail);
        if let Err(LedgerError::DuplicateHandle(handle)) = self.ledger.add(record.clone()) {
            warn!("open of already tracked {handle}, replacing record");
            self.ledger.replace(record);
        }
        handle
    }

    /// Forget `handle`; returns the path it was opened with.
    pub fn log_closed(&self, handle: Handle) -> String {
        match self.ledger.remove(handle) {
            Ok(record) => record.detail.path,
            Err(_) => UNKNOWN_FILE.to_string(),
        }
    }

    fn stage(&self, position: usize, value: SlotValue) {
        if let Err(e) = self.env.slots.stage(OPEN_FILE_LOGGER, position, value) {
            warn!("open file probe: {e}");
        }
    }

    /// Drop records whose handle `is_open` reports as closed.
    pub fn forget_closed(&self, is_open: impl Fn(Handle) -> bool) -> usize {
        let removed = self.ledger.retain(|record| is_open(record.handle));
        if removed > 0 {
            debug!("forgot {removed} closed files");
        }
        removed
    }

    // ========================================================================
    // Dumps
    // ========================================================================

    pub fn dump(&self, options: &OptionsLine) -> bool {
        let sink = self.env.sinks.resolve(options);
        if !sink.is_enabled() {
            return false;
        }

        let liveness = self.liveness.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(is_open) = liveness {
            self.forget_closed(|handle| is_open(handle));
        }

        let snapshot = self.ledger.snapshot();
        let filter = DumpFilter::from_options(options);
        let mut printed = 0usize;

        for record in snapshot.records_by_age() {
            let FileDetail { path, mode } = &record.detail;
            if !filter.accepts_lines(&[path]) {
                continue;
            }

            sink.write_line(&format!("File '{path}', mode '{mode}'"));
            for frame in record.stack.frames() {
                sink.write_line(&format!("\t{frame}"));
            }
            printed += 1;
        }

        if printed > 0 {
            sink.write_line(&format!("Printed {printed} of {} file(s) currently opened.", snapshot.len()));
        }
        printed > 0
    }
}

impl Tracker for OpenFileTracker {
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
        let dump_options = options.clone();
        let _ = scheduler.schedule(PERIODIC_DUMP_NAME, &options, sink, move || self.dump(&dump_options));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CapturedStack, StackFrame, StackSource};
    use crate::output::{MemorySink, SinkRegistry};

    struct Opener;

    impl StackSource for Opener {
        fn capture(&self) -> Arc<CapturedStack> {
            Arc::new(CapturedStack::from_frames(vec![StackFrame::new("app::open_config", None, None)]))
        }
    }

    fn tracker() -> (OpenFileTracker, Arc<MemorySink>) {
        let out = Arc::new(MemorySink::new());
        let sinks = Arc::new(SinkRegistry::with_console(out.clone(), Arc::new(MemorySink::new())));
        (OpenFileTracker::new(TrackerEnv::new(sinks, Arc::new(Opener))), out)
    }

    fn open(tracker: &OpenFileTracker, path: &str, mode: Option<&str>, handle: u64) {
        tracker.log_path(path);
        if let Some(mode) = mode {
            tracker.log_mode(mode);
        }
        tracker.log_opened(Handle(handle));
    }

    #[test]
    fn test_open_and_close() {
        let (tracker, _out) = tracker();
        open(&tracker, "/etc/app.conf", None, 3);
        open(&tracker, "/var/log/app.log", Some("wa"), 4);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.get(Handle(3)).map(|r| r.detail.mode.as_str()), Some("r"));
        assert_eq!(snapshot.get(Handle(4)).map(|r| r.detail.mode.as_str()), Some("wa"));

        assert_eq!(tracker.log_closed(Handle(3)), "/etc/app.conf");
        assert_eq!(tracker.log_closed(Handle(3)), UNKNOWN_FILE);
        assert_eq!(tracker.snapshot().len(), 1);
    }

    #[test]
    fn test_open_without_path_is_ignored() {
        let (tracker, _out) = tracker();
        tracker.log_mode("w");
        tracker.log_opened(Handle(5));
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn test_dump_filters_on_path() {
        let (tracker, out) = tracker();
        open(&tracker, "/etc/app.conf", None, 3);
        open(&tracker, "/var/log/app.log", Some("w"), 4);

        assert!(tracker.dump(&OptionsLine::parse("logDest=stdout,mustContain=\\.log$")));
        assert_eq!(
            out.take(),
            vec![
                "File '/var/log/app.log', mode 'w'",
                "\tapp::open_config",
                "Printed 1 of 2 file(s) currently opened.",
            ]
        );

        assert!(!tracker.dump(&OptionsLine::parse("logDest=stdout,mustNotContain=app")));
        assert!(out.lines().is_empty());
    }

    #[test]
    fn test_liveness_check_drops_stale_records() {
        let (tracker, out) = tracker();
        open(&tracker, "/tmp/a", None, 3);
        open(&tracker, "/tmp/b", None, 4);
        tracker.set_liveness_check(Arc::new(|handle: Handle| handle != Handle(3)));

        assert!(tracker.dump(&OptionsLine::parse("logDest=stdout")));
        assert!(out.contains("Printed 1 of 1 file(s) currently opened."));
        assert_eq!(tracker.snapshot().len(), 1);
    }
}
