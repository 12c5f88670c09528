//! Generic loggers
//!
//! Five independent logger families, enabled with `logGeneric1` to
//! `logGeneric5`. A call site stages any number of values with
//! [`GenericTracker::log`] and closes the event with
//! [`GenericTracker::log_last`]; the event is rendered through the family's
//! format once every configured value filter accepts it.
//!
//! Value filters address values by their 1-based position, e.g.
//! `maxLongValue2=100` or `value1StartsWith=/tmp`.

use log::{debug, warn};
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use super::{configure_in, CommandConfig, Tracker, TrackerEnv, GENERIC_LOGGER_BASE};
use crate::domain::{OptionError, SlotValue};
use crate::options::{CommandDescriptor, OptionsLine, OUTPUT_OPTIONS};
use crate::output::{log_line, Sink};
use dumpscope_common::MAX_GENERIC_LOGGERS;

pub const COMMAND_PREFIX: &str = "logGeneric";
pub const FORMAT: &str = "format";
pub const ONCE_PER_STACK: &str = "oncePerStack";

const FILTER_TEMPLATES: &[(&str, &str)] = &[
    ("maxLongValue<idx>", "The maximum integral value of the value with the given index."),
    ("minLongValue<idx>", "The minimum integral value of the value with the given index."),
    ("maxDoubleValue<idx>", "The maximum value of the value with the given index."),
    ("minDoubleValue<idx>", "The minimum value of the value with the given index."),
    ("equalsValue<idx>", "The value with the given index must equal this value."),
    ("value<idx>StartsWith", "The value with the given index must start with this string."),
    ("value<idx>EndsWith", "The value with the given index must end with this string."),
    ("value<idx>Contains", "The value with the given index must contain this string."),
    ("value<idx>MatchesRegexp", "A regexp which must match the value with the given index."),
];

// ============================================================================
// Value Filters
// ============================================================================

#[derive(Debug, Clone)]
enum ValueCheck {
    MaxLong(i64),
    MinLong(i64),
    MaxDouble(f64),
    MinDouble(f64),
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Matches(Regex),
}

#[derive(Debug, Clone)]
struct ValueFilter {
    /// 0-based position of the checked value
    position: usize,
    check: ValueCheck,
}

impl ValueFilter {
    /// Build the filter for one option key, if the key names one.
    ///
    /// A malformed numeric bound is reported to `err` and replaced by 0; a
    /// malformed pattern is reported and the filter dropped.
    fn from_option(options: &OptionsLine, key: &str, err: &dyn Sink) -> Option<Self> {
        let (index, kind) = parse_filter_key(key)?;
        let position = index.checked_sub(1)?;

        let report = |e: &OptionError| {
            for line in options.describe_option_error(key, e) {
                err.write_line(&line);
            }
        };
        let long = || {
            options.try_long(key).unwrap_or_else(|e| {
                report(&e);
                Some(0)
            })
        };
        let double = || {
            options.try_double(key).unwrap_or_else(|e| {
                report(&e);
                Some(0.0)
            })
        };

        let check = match kind {
            "maxLongValue" => ValueCheck::MaxLong(long()?),
            "minLongValue" => ValueCheck::MinLong(long()?),
            "maxDoubleValue" => ValueCheck::MaxDouble(double()?),
            "minDoubleValue" => ValueCheck::MinDouble(double()?),
            "equalsValue" => ValueCheck::Equals(options.get_string(key, None)?.to_string()),
            "StartsWith" => ValueCheck::StartsWith(options.get_string(key, None)?.to_string()),
            "EndsWith" => ValueCheck::EndsWith(options.get_string(key, None)?.to_string()),
            "Contains" => ValueCheck::Contains(options.get_string(key, None)?.to_string()),
            "MatchesRegexp" => ValueCheck::Matches(options.try_pattern(key).unwrap_or_else(|e| {
                report(&e);
                None
            })?),
            _ => return None,
        };
        Some(Self { position, check })
    }

    #[allow(clippy::cast_precision_loss)]
    fn accepts(&self, values: &[SlotValue]) -> bool {
        let value = values.get(self.position).unwrap_or(&SlotValue::Null);

        match &self.check {
            ValueCheck::MaxLong(max) => match value {
                SlotValue::Int(v) => v <= max,
                SlotValue::Float(v) => *v <= *max as f64,
                _ => false,
            },
            ValueCheck::MinLong(min) => match value {
                SlotValue::Int(v) => v >= min,
                SlotValue::Float(v) => *v >= *min as f64,
                _ => false,
            },
            ValueCheck::MaxDouble(max) => value.as_f64().is_some_and(|v| v <= *max),
            ValueCheck::MinDouble(min) => value.as_f64().is_some_and(|v| v >= *min),
            ValueCheck::Equals(expected) => equals(value, expected),
            ValueCheck::StartsWith(prefix) => text(value).is_some_and(|t| t.starts_with(prefix.as_str())),
            ValueCheck::EndsWith(suffix) => text(value).is_some_and(|t| t.ends_with(suffix.as_str())),
            ValueCheck::Contains(part) => text(value).is_some_and(|t| t.contains(part.as_str())),
            ValueCheck::Matches(pattern) => text(value).is_some_and(|t| pattern.is_match(&t)),
        }
    }
}

/// Split a filter key into its 1-based index and kind.
fn parse_filter_key(key: &str) -> Option<(usize, &'static str)> {
    for prefix in ["maxLongValue", "minLongValue", "maxDoubleValue", "minDoubleValue", "equalsValue"] {
        if let Some(index) = key.strip_prefix(prefix) {
            return parse_index(index).map(|index| (index, prefix));
        }
    }

    let rest = key.strip_prefix("value")?;
    for suffix in ["StartsWith", "EndsWith", "Contains", "MatchesRegexp"] {
        if let Some(index) = rest.strip_suffix(suffix) {
            return parse_index(index).map(|index| (index, suffix));
        }
    }
    None
}

fn parse_index(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn text(value: &SlotValue) -> Option<String> {
    (!value.is_null()).then(|| value.to_string())
}

#[allow(clippy::float_cmp)]
fn equals(value: &SlotValue, expected: &str) -> bool {
    match value {
        SlotValue::Null => expected == "null",
        SlotValue::Int(v) => expected.parse::<i64>().is_ok_and(|e| e == *v),
        SlotValue::Float(v) => expected.parse::<f64>().is_ok_and(|e| e == *v),
        other => other.to_string() == expected,
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Default format listing every value of the event
#[must_use]
pub fn default_format(family: usize, value_count: usize) -> String {
    let mut format = format!("Values for generic logger {family}:");
    for index in 1..=value_count {
        let _ = write!(format, " %{index}$s");
    }
    format
}

/// Render `format` with `%s`, `%<n>$s`, `%n` and `%%` conversions.
///
/// Arguments that do not exist render as `null`; any other conversion is
/// copied through unchanged.
#[must_use]
pub fn render(format: &str, values: &[SlotValue]) -> String {
    let arg = |index: usize| values.get(index).map_or_else(|| "null".to_string(), ToString::to_string);

    let mut out = String::with_capacity(format.len());
    let mut next = 0usize;
    let mut rest = format;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let conversion = &rest[start + 1..];

        if let Some(tail) = conversion.strip_prefix('s') {
            out.push_str(&arg(next));
            next += 1;
            rest = tail;
        } else if let Some(tail) = conversion.strip_prefix('n') {
            out.push('\n');
            rest = tail;
        } else if let Some(tail) = conversion.strip_prefix('%') {
            out.push('%');
            rest = tail;
        } else if let Some((index, tail)) = positional(conversion) {
            out.push_str(&arg(index - 1));
            rest = tail;
        } else {
            out.push('%');
            rest = conversion;
        }
    }
    out.push_str(rest);
    out
}

/// Parse `<n>$s` at the start of `conversion`.
fn positional(conversion: &str) -> Option<(usize, &str)> {
    let digits = conversion.bytes().take_while(u8::is_ascii_digit).count();
    let index: usize = conversion[..digits].parse().ok().filter(|index| *index > 0)?;
    conversion[digits..].strip_prefix("$s").map(|tail| (index, tail))
}

// ============================================================================
// Families
// ============================================================================

/// Parsed settings of one configured family
struct FamilySettings {
    options: OptionsLine,
    format: Option<String>,
    once_per_stack: bool,
    filters: Vec<ValueFilter>,
}

impl FamilySettings {
    fn from_options(options: OptionsLine, err: &dyn Sink) -> Self {
        let filters = options.keys().filter_map(|key| ValueFilter::from_option(&options, key, err)).collect();
        Self {
            format: options.get_string(FORMAT, None).map(str::to_string),
            once_per_stack: options.get_boolean(ONCE_PER_STACK, false),
            filters,
            options,
        }
    }
}

struct Family {
    number: usize,
    config: CommandConfig,
    settings: Mutex<Option<Arc<FamilySettings>>>,
    seen_stacks: Mutex<HashSet<Vec<String>>>,
}

impl Family {
    fn new(number: usize) -> Self {
        let mut command = CommandDescriptor::new(
            &format!("{COMMAND_PREFIX}{number}"),
            &format!("Used to specify the logging options for generic logger {number}"),
            &[
                (FORMAT, "The format used to print the values. Use %s or %<idx>$s for the values."),
                (ONCE_PER_STACK, "If true, each distinct call stack is logged only once."),
            ],
        );
        command.add_options(OUTPUT_OPTIONS);
        command.add_options(FILTER_TEMPLATES);

        Self {
            number,
            config: CommandConfig::new(command),
            settings: Mutex::new(None),
            seen_stacks: Mutex::new(HashSet::new()),
        }
    }

    fn settings(&self, err: &dyn Sink) -> Arc<FamilySettings> {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(settings.get_or_insert_with(|| Arc::new(FamilySettings::from_options(self.config.options(), err))))
    }

    fn reset(&self) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.seen_stacks.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

pub struct GenericTracker {
    env: TrackerEnv,
    families: Vec<Family>,
}

impl GenericTracker {
    #[must_use]
    pub fn new(env: TrackerEnv) -> Self {
        Self { env, families: (1..=MAX_GENERIC_LOGGERS).map(Family::new).collect() }
    }

    #[must_use]
    pub fn is_enabled(&self, family: usize) -> bool {
        self.family(family).is_some_and(|family| family.config.is_enabled())
    }

    fn family(&self, family: usize) -> Option<&Family> {
        family.checked_sub(1).and_then(|index| self.families.get(index))
    }

    // ========================================================================
    // Probes
    // ========================================================================

    /// Stage `value` as the next value of the current event of `family`.
    pub fn log<V: Clone + Into<SlotValue>>(&self, family: usize, value: V) -> V {
        if self.family(family).is_none() {
            warn!("generic logger {family} does not exist");
            return value;
        }
        if let Err(e) = self.env.slots.push(GENERIC_LOGGER_BASE + family - 1, value.clone().into()) {
            warn!("generic logger {family}: {e}");
        }
        value
    }

    /// Stage `value` as the last value and log the event.
    pub fn log_last<V: Clone + Into<SlotValue>>(&self, family: usize, value: V) -> V {
        let Some(entry) = self.family(family) else {
            warn!("generic logger {family} does not exist");
            return value;
        };

        match self.env.slots.finalize_with(GENERIC_LOGGER_BASE + family - 1, value.clone().into()) {
            Ok(values) => {
                if entry.config.is_enabled() {
                    self.emit(entry, &values);
                }
            }
            Err(e) => warn!("generic logger {family}: {e}"),
        }
        value
    }

    fn emit(&self, family: &Family, values: &[SlotValue]) {
        let settings = family.settings(self.env.sinks.stderr().as_ref());
        if !settings.filters.iter().all(|filter| filter.accepts(values)) {
            return;
        }

        if settings.once_per_stack {
            let stack: Vec<String> = self.env.stacks.capture().frames().iter().map(ToString::to_string).collect();
            let mut seen = family.seen_stacks.lock().unwrap_or_else(PoisonError::into_inner);
            if !seen.insert(stack) {
                debug!("generic logger {}: stack already logged", family.number);
                return;
            }
        }

        let message = match &settings.format {
            Some(format) => render(format, values),
            None => render(&default_format(family.number, values.len()), values),
        };
        let sink = self.env.sinks.resolve(&settings.options);
        log_line(sink.as_ref(), &settings.options, self.env.stacks.as_ref(), &message);
    }
}

impl Tracker for GenericTracker {
    fn commands(&self) -> Vec<Arc<CommandDescriptor>> {
        self.families.iter().map(|family| Arc::clone(family.config.command())).collect()
    }

    fn configure(&self, command: &str, line: &str) -> bool {
        let configs: Vec<&CommandConfig> = self.families.iter().map(|family| &family.config).collect();
        if !configure_in(&configs, command, line) {
            return false;
        }
        for family in self.families.iter().filter(|family| family.config.command().name() == command) {
            family.reset();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CapturedStack, StackFrame, StackSource};
    use crate::output::{MemorySink, SinkRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Alternates between two call stacks
    struct TwoSites(AtomicUsize);

    impl StackSource for TwoSites {
        fn capture(&self) -> Arc<CapturedStack> {
            let site = self.0.fetch_add(1, Ordering::Relaxed) % 2;
            let name = if site == 0 { "app::first" } else { "app::second" };
            Arc::new(CapturedStack::from_frames(vec![StackFrame::new(name, None, None)]))
        }
    }

    fn tracker() -> (GenericTracker, Arc<MemorySink>) {
        let (tracker, out, _err) = tracker_with_stderr();
        (tracker, out)
    }

    fn tracker_with_stderr() -> (GenericTracker, Arc<MemorySink>, Arc<MemorySink>) {
        let out = Arc::new(MemorySink::new());
        let err = Arc::new(MemorySink::new());
        let sinks = Arc::new(SinkRegistry::with_console(out.clone(), err.clone()));
        let stacks = Arc::new(TwoSites(AtomicUsize::new(0)));
        (GenericTracker::new(TrackerEnv::new(sinks, stacks)), out, err)
    }

    #[test]
    fn test_render() {
        let values = [SlotValue::from("a"), SlotValue::Int(2)];
        assert_eq!(render("%s-%s", &values), "a-2");
        assert_eq!(render("%2$s %1$s %%", &values), "2 a %");
        assert_eq!(render("%s %s %s", &values), "a 2 null");
        assert_eq!(render("x%ny", &values), "x\ny");
        assert_eq!(render("100%d", &values), "100%d");
    }

    #[test]
    fn test_default_format() {
        let (tracker, out) = tracker();
        assert!(tracker.configure("logGeneric2", "logDest=stdout"));
        tracker.log(2, "a");
        tracker.log_last(2, 7i64);
        assert_eq!(out.take(), vec!["Values for generic logger 2: a 7"]);

        tracker.log(1, "unconfigured");
        tracker.log_last(1, 1i64);
        assert!(out.lines().is_empty());
    }

    #[test]
    fn test_value_filters() {
        let (tracker, out) = tracker();
        tracker.configure(
            "logGeneric1",
            "logDest=stdout,format=%1$s:%2$s,value1StartsWith=/tmp,minLongValue2=10,maxDoubleValue2=100",
        );

        for (path, size) in [("/tmp/a", 50i64), ("/var/b", 50), ("/tmp/c", 5), ("/tmp/d", 500)] {
            tracker.log(1, path);
            tracker.log_last(1, size);
        }
        assert_eq!(out.take(), vec!["/tmp/a:50"]);
    }

    #[test]
    fn test_equals_and_regexp() {
        let (tracker, out) = tracker();
        tracker.configure("logGeneric3", "logDest=stdout,format=%s,equalsValue1=1.5,value1MatchesRegexp=^1");

        tracker.log_last(3, 1.5f64);
        tracker.log_last(3, 2.5f64);
        tracker.log_last(3, "1.5");
        assert_eq!(out.take(), vec!["1.5", "1.5"]);
    }

    #[test]
    fn test_missing_value_fails_numeric_filter() {
        let (tracker, out) = tracker();
        tracker.configure("logGeneric1", "logDest=stdout,maxLongValue3=10");
        tracker.log(1, 1i64);
        tracker.log_last(1, 2i64);
        assert!(out.lines().is_empty());
    }

    #[test]
    fn test_malformed_bound_is_reported_and_defaults_to_zero() {
        let (tracker, out, err) = tracker_with_stderr();
        tracker.configure("logGeneric1", "logDest=stdout,format=%s,maxLongValue1=abc,minDoubleValue2=x");

        tracker.log_last(1, 500i64);
        tracker.log_last(1, -3i64);
        assert!(out.lines().is_empty());
        assert!(err.contains("Error in option maxLongValue1=abc for command 'logGeneric1'"));
        assert!(err.contains("Could not parse integer value 'abc'"));
        assert!(err.contains("Error in option minDoubleValue2=x for command 'logGeneric1'"));

        tracker.configure("logGeneric1", "logDest=stdout,format=%s,maxLongValue1=abc");
        tracker.log_last(1, 500i64);
        tracker.log_last(1, -3i64);
        assert_eq!(out.take(), vec!["-3"]);
    }

    #[test]
    fn test_malformed_pattern_is_reported() {
        let (tracker, out, err) = tracker_with_stderr();
        tracker.configure("logGeneric4", "logDest=stdout,format=%s,value1MatchesRegexp=(");
        tracker.log_last(4, "anything");
        assert_eq!(out.take(), vec!["anything"]);
        assert!(err.contains("Error in option value1MatchesRegexp=( for command 'logGeneric4'"));
    }

    #[test]
    fn test_oversized_event_is_dropped() {
        let (tracker, out) = tracker();
        tracker.configure("logGeneric1", "logDest=stdout,format=%s");
        for i in 0..crate::correlation::slots::MAX_POSITIONS {
            tracker.log(1, i64::try_from(i).unwrap());
        }
        tracker.log_last(1, "overflow");
        assert!(out.lines().is_empty());

        tracker.log_last(1, "next");
        assert_eq!(out.take(), vec!["next"]);
    }

    #[test]
    fn test_once_per_stack() {
        let (tracker, out) = tracker();
        tracker.configure("logGeneric1", "logDest=stdout,oncePerStack,format=%s");
        for i in 0..4i64 {
            tracker.log_last(1, i);
        }
        assert_eq!(out.take(), vec!["0", "1"]);
    }

    #[test]
    fn test_out_of_range_family_is_ignored() {
        let (tracker, _out) = tracker();
        assert_eq!(tracker.log(0, 3i64), 3);
        assert_eq!(tracker.log_last(6, "x"), "x");
        assert!(!tracker.is_enabled(6));
    }

    #[test]
    fn test_commands_accept_indexed_filters() {
        let (tracker, _out) = tracker();
        let commands = tracker.commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[4].name(), "logGeneric5");
        assert!(commands[0].has_option("value12Contains"));
        assert!(commands[0].has_option("maxLongValue1"));
        assert!(!commands[0].has_option("valueContains"));
    }

    #[test]
    fn test_parse_filter_key() {
        assert_eq!(parse_filter_key("maxLongValue2"), Some((2, "maxLongValue")));
        assert_eq!(parse_filter_key("value10EndsWith"), Some((10, "EndsWith")));
        assert_eq!(parse_filter_key("valueXEndsWith"), None);
        assert_eq!(parse_filter_key("format"), None);
    }
}
