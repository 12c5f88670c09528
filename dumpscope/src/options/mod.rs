//! Configuration lines and command descriptors
//!
//! Every tracker is configured by one option line bound to a
//! [`CommandDescriptor`]. The same grammar is used for startup configuration
//! and for the inline options of an on-demand dump request.

pub mod command;
pub mod line;
pub mod units;

pub use command::CommandDescriptor;
pub use line::{split_unescaped, OptionsLine};
pub use units::{parse_magnitude, DURATION_UNITS, SIZE_UNITS};

// ============================================================================
// Output Options
// ============================================================================

pub const LOG_DEST: &str = "logDest";
pub const LOG_WITH_STACK: &str = "logWithStack";

// ============================================================================
// Scheduler Options
// ============================================================================

pub const DUMP_COUNT: &str = "dumpCount";
pub const DUMP_INTERVAL: &str = "dumpInterval";
pub const DUMP_DELAY: &str = "dumpDelay";
pub const EXIT_AFTER_LAST_DUMP: &str = "exitAfterLastDump";

// ============================================================================
// Dump Filter Options
// ============================================================================

pub const MAX_FRAMES: &str = "maxFrames";
pub const MIN_SIZE: &str = "minSize";
pub const MIN_STACK_SIZE: &str = "minStackSize";
pub const MIN_INCREASE: &str = "minIncrease";
pub const MIN_PERCENTAGE: &str = "minPercentage";
pub const MIN_AGE: &str = "minAge";
pub const MAX_AGE: &str = "maxAge";
pub const MUST_CONTAIN: &str = "mustContain";
pub const MUST_NOT_CONTAIN: &str = "mustNotContain";

pub const LOG_DEST_HELP: &str = "Destination of the output: 'stdout', 'stderr', 'none' or a file name. \
                                 Prefix the file name with '+' to append.";

/// Help entries for the output options
pub const OUTPUT_OPTIONS: &[(&str, &str)] = &[
    (LOG_DEST, LOG_DEST_HELP),
    (LOG_WITH_STACK, "If true, each logged line is followed by the current call stack."),
];

/// Help entries for the periodic dump options
pub const SCHEDULER_OPTIONS: &[(&str, &str)] = &[
    (DUMP_COUNT, "Number of periodic dumps to perform. 0 disables periodic dumps."),
    (DUMP_INTERVAL, "Interval between periodic dumps, e.g. '30s', '1h30m'. Default 1h."),
    (DUMP_DELAY, "Delay before the first periodic dump. Defaults to the interval."),
    (EXIT_AFTER_LAST_DUMP, "If true, the process exits after the last periodic dump."),
];
