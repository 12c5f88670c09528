//! Trackers: the probe targets behind each command
//!
//! Every tracker owns its correlation logger indices, its commands and, where
//! it keeps live resources, its ledger and dump throttle. The agent context
//! drives all of them through the [`Tracker`] trait.
//!
//! ## Logger Layout
//!
//! | Index | Tracker |
//! |-------|---------|
//! | 0 | native allocations |
//! | 1 | open files |
//! | 2..=4 | locale, time zone, system property changes |
//! | 5..=9 | generic loggers 1-5 |

pub mod allocations;
pub mod changes;
pub mod generic;
pub mod open_files;

pub use allocations::AllocationTracker;
pub use changes::{ChangeKind, ChangeTracker};
pub use generic::GenericTracker;
pub use open_files::{FileDetail, OpenFileTracker};

use std::sync::{Arc, PoisonError, RwLock};

use crate::correlation::CorrelationSlots;
use crate::dumps::{DumpDispatcher, DumpScheduler};
use crate::ledger::StackSource;
use crate::options::{CommandDescriptor, OptionsLine};
use crate::output::SinkRegistry;
use dumpscope_common::MAX_GENERIC_LOGGERS;

pub const ALLOCATION_LOGGER: usize = 0;
pub const OPEN_FILE_LOGGER: usize = 1;
pub const LOCALE_LOGGER: usize = 2;
pub const TIME_ZONE_LOGGER: usize = 3;
pub const SYS_PROPS_LOGGER: usize = 4;
pub const GENERIC_LOGGER_BASE: usize = 5;
pub const LOGGER_COUNT: usize = GENERIC_LOGGER_BASE + MAX_GENERIC_LOGGERS;

/// Services shared by all trackers
#[derive(Clone)]
pub struct TrackerEnv {
    pub slots: Arc<CorrelationSlots>,
    pub sinks: Arc<SinkRegistry>,
    pub stacks: Arc<dyn StackSource>,
}

impl TrackerEnv {
    #[must_use]
    pub fn new(sinks: Arc<SinkRegistry>, stacks: Arc<dyn StackSource>) -> Self {
        Self { slots: Arc::new(CorrelationSlots::new(LOGGER_COUNT)), sinks, stacks }
    }
}

/// A command together with the option line it was enabled with
pub struct CommandConfig {
    command: Arc<CommandDescriptor>,
    line: RwLock<Option<OptionsLine>>,
}

impl CommandConfig {
    #[must_use]
    pub fn new(command: CommandDescriptor) -> Self {
        Self { command: Arc::new(command), line: RwLock::new(None) }
    }

    #[must_use]
    pub fn command(&self) -> &Arc<CommandDescriptor> {
        &self.command
    }

    pub fn configure(&self, line: &str) {
        let options = OptionsLine::for_command(line, Arc::clone(&self.command));
        *self.line.write().unwrap_or_else(PoisonError::into_inner) = Some(options);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.line.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Configured line, or an empty line bound to the command
    #[must_use]
    pub fn options(&self) -> OptionsLine {
        self.line
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| OptionsLine::for_command("", Arc::clone(&self.command)))
    }
}

/// Probe target driven by the agent context
pub trait Tracker: Send + Sync {
    /// Commands that can be enabled with an option line
    fn commands(&self) -> Vec<Arc<CommandDescriptor>>;

    /// Store the option line for one of this tracker's commands.
    ///
    /// Returns false if the command does not belong to this tracker.
    fn configure(&self, command: &str, line: &str) -> bool;

    /// Register on-demand dumps, if the tracker has any
    fn register_dumps(self: Arc<Self>, _dispatcher: &DumpDispatcher) {}

    /// Arm periodic dumps for the enabled commands
    fn start(self: Arc<Self>, _scheduler: &DumpScheduler) {}
}

/// Look up `command` among `configs` and configure it.
fn configure_in(configs: &[&CommandConfig], command: &str, line: &str) -> bool {
    match configs.iter().find(|config| config.command().name() == command) {
        Some(config) => {
            config.configure(line);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_config() {
        let config = CommandConfig::new(CommandDescriptor::new("traceX", "X.", &[("logDest", "")]));
        assert!(!config.is_enabled());
        assert!(!config.options().has_option("logDest"));

        config.configure("logDest=stdout");
        assert!(config.is_enabled());
        assert_eq!(config.options().get_string("logDest", None), Some("stdout"));
        assert_eq!(config.options().command().map(CommandDescriptor::name), Some("traceX"));
    }

    #[test]
    fn test_configure_in() {
        let a = CommandConfig::new(CommandDescriptor::new("a", "", &[]));
        let b = CommandConfig::new(CommandDescriptor::new("b", "", &[]));
        assert!(configure_in(&[&a, &b], "b", ""));
        assert!(!configure_in(&[&a, &b], "c", ""));
        assert!(b.is_enabled());
        assert!(!a.is_enabled());
    }
}
