//! Setting-change loggers
//!
//! Traces changes of process-wide settings: the default locale per category,
//! the default time zone and individual system properties. Each change is
//! staged in three steps on the kind's logger:
//!
//! 1. [`ChangeTracker::log_key`]: the setting key (locale category, zone
//!    display name, property name)
//! 2. [`ChangeTracker::log_new_value`]: the new value, `None` for a removal
//! 3. [`ChangeTracker::log_change`]: finalizes with the old value
//!
//! A change is reported together with the caller's stack, and only when the
//! old and new values differ.

use log::warn;
use std::sync::Arc;

use super::{configure_in, CommandConfig, Tracker, TrackerEnv, LOCALE_LOGGER, SYS_PROPS_LOGGER, TIME_ZONE_LOGGER};
use crate::domain::SlotValue;
use crate::options::{CommandDescriptor, OUTPUT_OPTIONS};
use crate::output::log_with_stack;

const KEY_SLOT: usize = 0;
const NEW_VALUE_SLOT: usize = 1;
const OLD_VALUE_SLOT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Locale,
    TimeZone,
    SysProps,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Locale, ChangeKind::TimeZone, ChangeKind::SysProps];

    #[must_use]
    pub fn command_name(self) -> &'static str {
        match self {
            ChangeKind::Locale => "traceLocaleChange",
            ChangeKind::TimeZone => "traceTimeZoneChange",
            ChangeKind::SysProps => "traceSysPropsChange",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ChangeKind::Locale => "Logs when the default locale is changed.",
            ChangeKind::TimeZone => "Traces when the default time zone is changed.",
            ChangeKind::SysProps => "Traces changes to the system properties.",
        }
    }

    fn logger(self) -> usize {
        match self {
            ChangeKind::Locale => LOCALE_LOGGER,
            ChangeKind::TimeZone => TIME_ZONE_LOGGER,
            ChangeKind::SysProps => SYS_PROPS_LOGGER,
        }
    }

    fn index(self) -> usize {
        match self {
            ChangeKind::Locale => 0,
            ChangeKind::TimeZone => 1,
            ChangeKind::SysProps => 2,
        }
    }

    fn message(self, key: &str, old: Option<&str>, new: Option<&str>) -> String {
        let old = old.unwrap_or("null");
        match (self, new) {
            (ChangeKind::Locale, new) => {
                format!("Changed default locale for category '{key}' from '{old}' to '{}'.", new.unwrap_or("null"))
            }
            (ChangeKind::TimeZone, new) => {
                format!("Changed default time zone to {key} ({}).", new.unwrap_or("null"))
            }
            (ChangeKind::SysProps, Some(new)) => {
                format!("System property '{key}' changed from '{old}' to '{new}'")
            }
            (ChangeKind::SysProps, None) => {
                format!("System properties '{key}' with value '{old}' removed")
            }
        }
    }
}

pub struct ChangeTracker {
    env: TrackerEnv,
    configs: [CommandConfig; 3],
}

impl ChangeTracker {
    #[must_use]
    pub fn new(env: TrackerEnv) -> Self {
        let config = |kind: ChangeKind| {
            CommandConfig::new(CommandDescriptor::new(kind.command_name(), kind.description(), OUTPUT_OPTIONS))
        };
        Self { env, configs: ChangeKind::ALL.map(config) }
    }

    #[must_use]
    pub fn is_enabled(&self, kind: ChangeKind) -> bool {
        self.configs[kind.index()].is_enabled()
    }

    // ========================================================================
    // Probes
    // ========================================================================

    pub fn log_key<'a>(&self, kind: ChangeKind, key: &'a str) -> &'a str {
        self.stage(kind, KEY_SLOT, SlotValue::from(key));
        key
    }

    pub fn log_new_value<'a>(&self, kind: ChangeKind, value: Option<&'a str>) -> Option<&'a str> {
        self.stage(kind, NEW_VALUE_SLOT, value.map_or(SlotValue::Null, SlotValue::from));
        value
    }

    /// Close the staged change with the value it replaces.
    ///
    /// Returns true if the setting actually changed.
    pub fn log_change(&self, kind: ChangeKind, old: Option<&str>) -> bool {
        self.stage(kind, OLD_VALUE_SLOT, old.map_or(SlotValue::Null, SlotValue::from));
        let values = match self.env.slots.finalize(kind.logger()) {
            Ok(values) => values,
            Err(e) => {
                warn!("{} probe: {e}", kind.command_name());
                return false;
            }
        };

        let slot = |position: usize| values.get(position).and_then(SlotValue::as_str);
        let (key, new, old) = (slot(KEY_SLOT).unwrap_or("null"), slot(NEW_VALUE_SLOT), slot(OLD_VALUE_SLOT));
        if old == new {
            return false;
        }

        let config = &self.configs[kind.index()];
        if config.is_enabled() {
            let options = config.options();
            let sink = self.env.sinks.resolve(&options);
            log_with_stack(sink.as_ref(), self.env.stacks.as_ref(), &kind.message(key, old, new));
        }
        true
    }

    fn stage(&self, kind: ChangeKind, position: usize, value: SlotValue) {
        if let Err(e) = self.env.slots.stage(kind.logger(), position, value) {
            warn!("{} probe: {e}", kind.command_name());
        }
    }
}

impl Tracker for ChangeTracker {
    fn commands(&self) -> Vec<Arc<CommandDescriptor>> {
        self.configs.iter().map(|config| Arc::clone(config.command())).collect()
    }

    fn configure(&self, command: &str, line: &str) -> bool {
        let configs: Vec<&CommandConfig> = self.configs.iter().collect();
        configure_in(&configs, command, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CapturedStack, StackFrame, StackSource};
    use crate::output::{MemorySink, SinkRegistry};

    struct Setter;

    impl StackSource for Setter {
        fn capture(&self) -> Arc<CapturedStack> {
            Arc::new(CapturedStack::from_frames(vec![StackFrame::new("app::settings::apply", Some("settings.rs"), Some(12))]))
        }
    }

    fn tracker() -> (ChangeTracker, Arc<MemorySink>) {
        let out = Arc::new(MemorySink::new());
        let sinks = Arc::new(SinkRegistry::with_console(out.clone(), Arc::new(MemorySink::new())));
        (ChangeTracker::new(TrackerEnv::new(sinks, Arc::new(Setter))), out)
    }

    fn change(tracker: &ChangeTracker, kind: ChangeKind, key: &str, new: Option<&str>, old: Option<&str>) -> bool {
        tracker.log_key(kind, key);
        tracker.log_new_value(kind, new);
        tracker.log_change(kind, old)
    }

    #[test]
    fn test_locale_change() {
        let (tracker, out) = tracker();
        tracker.configure("traceLocaleChange", "logDest=stdout");

        assert!(change(&tracker, ChangeKind::Locale, "FORMAT", Some("German (Germany)"), Some("English (United States)")));
        assert_eq!(
            out.take(),
            vec![
                "Changed default locale for category 'FORMAT' from 'English (United States)' to 'German (Germany)'.",
                "\tapp::settings::apply (settings.rs:12)",
            ]
        );

        assert!(!change(&tracker, ChangeKind::Locale, "FORMAT", Some("German (Germany)"), Some("German (Germany)")));
        assert!(out.lines().is_empty());
    }

    #[test]
    fn test_time_zone_change() {
        let (tracker, out) = tracker();
        tracker.configure("traceTimeZoneChange", "logDest=stdout");

        change(&tracker, ChangeKind::TimeZone, "Central European Time", Some("Europe/Berlin"), Some("UTC"));
        assert!(out.contains("Changed default time zone to Central European Time (Europe/Berlin)."));
    }

    #[test]
    fn test_system_property_change_and_removal() {
        let (tracker, out) = tracker();
        tracker.configure("traceSysPropsChange", "logDest=stdout");

        change(&tracker, ChangeKind::SysProps, "user.dir", Some("/srv"), Some("/home"));
        change(&tracker, ChangeKind::SysProps, "tmp.dir", None, Some("/tmp"));
        change(&tracker, ChangeKind::SysProps, "absent", None, None);

        let lines = out.take();
        assert!(lines.contains(&"System property 'user.dir' changed from '/home' to '/srv'".to_string()));
        assert!(lines.contains(&"System properties 'tmp.dir' with value '/tmp' removed".to_string()));
        assert!(!lines.iter().any(|line| line.contains("absent")));
    }

    #[test]
    fn test_disabled_kind_still_reports_change() {
        let (tracker, out) = tracker();
        assert!(change(&tracker, ChangeKind::Locale, "DISPLAY", Some("French"), Some("English")));
        assert!(!tracker.is_enabled(ChangeKind::Locale));
        assert!(out.lines().is_empty());
    }

    #[test]
    fn test_commands() {
        let (tracker, _out) = tracker();
        let names: Vec<String> = tracker.commands().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["traceLocaleChange", "traceTimeZoneChange", "traceSysPropsChange"]);
        assert!(tracker.commands()[0].has_option("logWithStack"));
    }
}
