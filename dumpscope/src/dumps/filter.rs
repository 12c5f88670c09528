//! Dump gates and per-record filters
//!
//! A dump first passes three snapshot-level gates against the total size seen
//! at the last emitted dump; then each record is checked on its own.

use regex::Regex;
use std::time::{Duration, SystemTime};

use crate::ledger::{ResourceRecord, StackFrame};
use crate::options::{
    OptionsLine, MAX_AGE, MAX_FRAMES, MIN_AGE, MIN_INCREASE, MIN_PERCENTAGE, MIN_SIZE, MIN_STACK_SIZE,
    MUST_CONTAIN, MUST_NOT_CONTAIN,
};

pub const DEFAULT_MAX_FRAMES: i32 = 16;

/// One year
pub const DEFAULT_MAX_AGE_SECS: i64 = 365 * 24 * 3600;

/// Help entries for the filter options
pub const FILTER_OPTIONS: &[(&str, &str)] = &[
    (MAX_FRAMES, "The maximum number of frames printed per stack. Default 16."),
    (MIN_SIZE, "Only dump if the total size is at least this value. Supports k, M and G."),
    (MIN_STACK_SIZE, "Only print allocations of at least this size. Supports k, M and G."),
    (MIN_INCREASE, "Only dump if the total size grew by at least this value since the last dump."),
    (MIN_PERCENTAGE, "Only dump if the total size is at least this percentage of the last dump."),
    (MIN_AGE, "Only print allocations at least this old. Supports s, m, h and d."),
    (MAX_AGE, "Only print allocations at most this old. Supports s, m, h and d."),
    (MUST_CONTAIN, "A regexp which must match a frame of the printed stacks."),
    (MUST_NOT_CONTAIN, "A regexp which must not match any frame of the printed stacks."),
];

/// Filter settings of one dump invocation
#[derive(Debug, Clone)]
pub struct DumpFilter {
    pub max_frames: usize,
    pub min_size: i64,
    pub min_stack_size: i64,
    /// Disabled when negative
    pub min_increase: i64,
    /// Factor applied to the last dumped total (300 percent is 3.0)
    pub min_percentage_increase: f64,
    pub min_age: Duration,
    pub max_age: Duration,
    pub must_contain: Option<Regex>,
    pub must_not_contain: Option<Regex>,
}

impl Default for DumpFilter {
    fn default() -> Self {
        Self::from_options(&OptionsLine::default())
    }
}

impl DumpFilter {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_options(options: &OptionsLine) -> Self {
        Self {
            max_frames: usize::try_from(options.get_int(MAX_FRAMES, DEFAULT_MAX_FRAMES)).unwrap_or(0),
            min_size: options.get_size(MIN_SIZE, 0),
            min_stack_size: options.get_size(MIN_STACK_SIZE, 0),
            min_increase: options.get_size(MIN_INCREASE, -1),
            min_percentage_increase: 0.01 * options.get_long(MIN_PERCENTAGE, 0) as f64,
            min_age: seconds(options.get_duration_secs(MIN_AGE, 0)),
            max_age: seconds(options.get_duration_secs(MAX_AGE, DEFAULT_MAX_AGE_SECS)),
            must_contain: options.get_pattern(MUST_CONTAIN, None),
            must_not_contain: options.get_pattern(MUST_NOT_CONTAIN, None),
        }
    }

    /// Snapshot-level gates: absolute floor, growth factor, growth amount.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn should_dump(&self, total: u64, last_total: u64) -> bool {
        let total = i128::from(total);
        let last_total = i128::from(last_total);

        if total < i128::from(self.min_size) {
            return false;
        }
        if (total as f64) < (last_total as f64) * self.min_percentage_increase {
            return false;
        }
        if self.min_increase >= 0 && total < last_total + i128::from(self.min_increase) {
            return false;
        }
        true
    }

    /// Size and age bounds of one record
    #[must_use]
    pub fn accepts_size_and_age<D>(&self, record: &ResourceRecord<D>, now: SystemTime) -> bool {
        if i128::from(record.size) < i128::from(self.min_stack_size) {
            return false;
        }
        let age = record.age(now);
        age <= self.max_age && age >= self.min_age
    }

    /// Innermost frames printed and matched for a stack
    #[must_use]
    pub fn window<'a>(&self, frames: &'a [StackFrame]) -> &'a [StackFrame] {
        &frames[..frames.len().min(self.max_frames)]
    }

    /// Pattern check over rendered lines: `mustContain` must find a line,
    /// `mustNotContain` must find none.
    #[must_use]
    pub fn accepts_lines<S: AsRef<str>>(&self, lines: &[S]) -> bool {
        if let Some(pattern) = &self.must_contain {
            if !lines.iter().any(|line| pattern.is_match(line.as_ref())) {
                return false;
            }
        }
        if let Some(pattern) = &self.must_not_contain {
            if lines.iter().any(|line| pattern.is_match(line.as_ref())) {
                return false;
            }
        }
        true
    }

    /// Full per-record check; returns the rendered stack window on success.
    #[must_use]
    pub fn accepts<D>(&self, record: &ResourceRecord<D>, now: SystemTime) -> Option<Vec<String>> {
        if !self.accepts_size_and_age(record, now) {
            return None;
        }

        let window: Vec<String> = self.window(record.stack.frames()).iter().map(ToString::to_string).collect();
        self.accepts_lines(&window).then_some(window)
    }
}

fn seconds(secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}
