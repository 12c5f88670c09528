//! Periodic dumps
//!
//! Each scheduled dump runs on its own background thread: wait `dumpDelay`,
//! then attempt a dump every `dumpInterval` until `dumpCount` dumps were
//! actually emitted. Attempts suppressed by the dump gates do not count.

use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::options::{OptionsLine, DUMP_COUNT, DUMP_DELAY, DUMP_INTERVAL, EXIT_AFTER_LAST_DUMP};
use crate::output::Sink;

/// One hour
pub const DEFAULT_INTERVAL_SECS: i64 = 3600;

pub const DUMPER_THREAD_NAME: &str = "Dumper Thread";

/// Blocking wait used between dump attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSleeper;

impl Sleeper for SystemSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Called with the exit status after the last dump when `exitAfterLastDump`
/// is set
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

/// Process exit
#[must_use]
pub fn process_exit() -> ExitHook {
    Arc::new(exit_process)
}

fn exit_process(code: i32) {
    std::process::exit(code);
}

/// Scheduler settings read from an enable command's line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub count: u64,
    pub interval: Duration,
    pub delay: Duration,
    pub exit_after_last_dump: bool,
}

impl ScheduleOptions {
    #[must_use]
    pub fn from_options(options: &OptionsLine) -> Self {
        let interval = options.get_duration_secs(DUMP_INTERVAL, DEFAULT_INTERVAL_SECS);
        let delay = options.get_duration_secs(DUMP_DELAY, interval);

        Self {
            // A negative dumpCount clamps to 0, which disables scheduling
            count: u64::try_from(options.get_long(DUMP_COUNT, 0)).unwrap_or(0),
            interval: seconds(interval),
            delay: seconds(delay),
            exit_after_last_dump: options.get_boolean(EXIT_AFTER_LAST_DUMP, false),
        }
    }

    /// False when `dumpCount` is zero or negative
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.count > 0
    }
}

fn seconds(secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}

/// Starts periodic dump threads
#[derive(Clone)]
pub struct DumpScheduler {
    sleeper: Arc<dyn Sleeper>,
    exit: ExitHook,
}

impl Default for DumpScheduler {
    fn default() -> Self {
        Self::new(Arc::new(SystemSleeper), process_exit())
    }
}

impl DumpScheduler {
    #[must_use]
    pub fn new(sleeper: Arc<dyn Sleeper>, exit: ExitHook) -> Self {
        Self { sleeper, exit }
    }

    /// Start periodic dumps of `name` as configured by `options`.
    ///
    /// `dump` performs one attempt and returns whether it emitted anything.
    /// Returns `None` when scheduling is disabled or the thread could not be
    /// started.
    pub fn schedule<F>(&self, name: &str, options: &OptionsLine, sink: Arc<dyn Sink>, dump: F) -> Option<JoinHandle<()>>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let schedule = ScheduleOptions::from_options(options);
        if !schedule.is_enabled() {
            debug!("periodic {name} dumps disabled");
            return None;
        }

        info!(
            "scheduling {} {name} dumps every {}s after {}s",
            schedule.count,
            schedule.interval.as_secs(),
            schedule.delay.as_secs()
        );

        let name = name.to_string();
        let sleeper = Arc::clone(&self.sleeper);
        let exit = Arc::clone(&self.exit);

        let spawned = std::thread::Builder::new()
            .name(DUMPER_THREAD_NAME.to_string())
            .spawn(move || run_schedule(&name, schedule, sleeper.as_ref(), sink.as_ref(), exit.as_ref(), dump));

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("could not start dumper thread: {e}");
                None
            }
        }
    }
}

fn run_schedule(
    name: &str,
    schedule: ScheduleOptions,
    sleeper: &dyn Sleeper,
    sink: &dyn Sink,
    exit: &(dyn Fn(i32) + Send + Sync),
    mut dump: impl FnMut() -> bool,
) {
    sleeper.sleep(schedule.delay);

    let mut left = schedule.count;
    while left > 0 {
        if dump() {
            left -= 1;
            sink.write_line(&format!("{name} dump {} of {}.", schedule.count - left, schedule.count));
        }
        if left > 0 {
            sleeper.sleep(schedule.interval);
        }
    }

    if schedule.exit_after_last_dump {
        sink.write_line(&format!("{name} dumps finished. Exiting."));
        exit(0);
    }
}
