//! Agent context: the process-lifetime state shared by all probes
//!
//! The context owns the command table, the output sinks, the dump dispatcher
//! and scheduler, and every tracker. Probes reach their tracker through the
//! accessors; the host drives configuration and dumps through the methods
//! below, in this order:
//!
//! 1. [`AgentContext::configure`] once per enabled command
//! 2. [`AgentContext::check_commands`] to reject help requests and typos
//! 3. [`AgentContext::start`] to register dumps and arm periodic ones
//! 4. [`AgentContext::perform_dump`] for every on-demand request

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::ConfigError;
use crate::dumps::{process_exit, DumpDispatcher, DumpScheduler, ExitHook, Sleeper, SystemSleeper};
use crate::ledger::{BacktraceSource, StackSource};
use crate::options::{CommandDescriptor, OptionsLine};
use crate::output::{Sink, SinkRegistry};
use crate::trackers::{AllocationTracker, ChangeTracker, GenericTracker, OpenFileTracker, Tracker, TrackerEnv};

/// Builder for [`AgentContext`]; every service defaults to the real one.
#[derive(Default)]
pub struct AgentContextBuilder {
    sleeper: Option<Arc<dyn Sleeper>>,
    exit: Option<ExitHook>,
    stacks: Option<Arc<dyn StackSource>>,
    console: Option<(Arc<dyn Sink>, Arc<dyn Sink>)>,
}

impl AgentContextBuilder {
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    #[must_use]
    pub fn exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = Some(exit);
        self
    }

    #[must_use]
    pub fn stack_source(mut self, stacks: Arc<dyn StackSource>) -> Self {
        self.stacks = Some(stacks);
        self
    }

    /// Replace the console streams behind `stdout` and `stderr`.
    #[must_use]
    pub fn console(mut self, stdout: Arc<dyn Sink>, stderr: Arc<dyn Sink>) -> Self {
        self.console = Some((stdout, stderr));
        self
    }

    #[must_use]
    pub fn build(self) -> AgentContext {
        let sinks = Arc::new(match self.console {
            Some((stdout, stderr)) => SinkRegistry::with_console(stdout, stderr),
            None => SinkRegistry::new(),
        });
        let stacks = self.stacks.unwrap_or_else(|| Arc::new(BacktraceSource::default()));
        let env = TrackerEnv::new(Arc::clone(&sinks), stacks);

        let scheduler = DumpScheduler::new(
            self.sleeper.unwrap_or_else(|| Arc::new(SystemSleeper)),
            self.exit.unwrap_or_else(process_exit),
        );
        let dispatcher = DumpDispatcher::new(sinks.stdout(), sinks.stderr());

        let allocations = Arc::new(AllocationTracker::new(env.clone()));
        let open_files = Arc::new(OpenFileTracker::new(env.clone()));
        let generic = Arc::new(GenericTracker::new(env.clone()));
        let changes = Arc::new(ChangeTracker::new(env));

        let trackers: Vec<Arc<dyn Tracker>> = vec![
            Arc::clone(&allocations) as Arc<dyn Tracker>,
            Arc::clone(&open_files) as Arc<dyn Tracker>,
            Arc::clone(&changes) as Arc<dyn Tracker>,
            Arc::clone(&generic) as Arc<dyn Tracker>,
        ];

        AgentContext {
            sinks,
            dispatcher,
            scheduler,
            allocations,
            open_files,
            generic,
            changes,
            trackers,
            configured: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }
}

pub struct AgentContext {
    sinks: Arc<SinkRegistry>,
    dispatcher: DumpDispatcher,
    scheduler: DumpScheduler,
    allocations: Arc<AllocationTracker>,
    open_files: Arc<OpenFileTracker>,
    generic: Arc<GenericTracker>,
    changes: Arc<ChangeTracker>,
    trackers: Vec<Arc<dyn Tracker>>,
    /// Enabled commands with their option lines, in configuration order
    configured: Mutex<Vec<(Arc<CommandDescriptor>, String)>>,
    started: AtomicBool,
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AgentContext {
    #[must_use]
    pub fn builder() -> AgentContextBuilder {
        AgentContextBuilder::default()
    }

    // ========================================================================
    // Trackers
    // ========================================================================

    #[must_use]
    pub fn allocations(&self) -> &Arc<AllocationTracker> {
        &self.allocations
    }

    #[must_use]
    pub fn open_files(&self) -> &Arc<OpenFileTracker> {
        &self.open_files
    }

    #[must_use]
    pub fn generic(&self) -> &Arc<GenericTracker> {
        &self.generic
    }

    #[must_use]
    pub fn changes(&self) -> &Arc<ChangeTracker> {
        &self.changes
    }

    #[must_use]
    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.sinks
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// All enable commands, in table order
    #[must_use]
    pub fn commands(&self) -> Vec<Arc<CommandDescriptor>> {
        self.trackers.iter().flat_map(|tracker| tracker.commands()).collect()
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.commands().into_iter().find(|command| command.name() == name)
    }

    /// `(name, description)` of every command, for the top-level help
    #[must_use]
    pub fn command_summaries(&self) -> Vec<(String, String)> {
        self.commands()
            .iter()
            .map(|command| (command.name().to_string(), command.description().to_string()))
            .collect()
    }

    pub fn print_commands(&self) {
        let out = self.sinks.stdout();
        out.write_line("The following commands are supported:");
        for (name, description) in self.command_summaries() {
            out.write_line(&format!("{name}: {description}"));
        }
        out.write_line("Use <command>,help to get further help for a specific command.");
    }

    /// Enable `command` with the option `line`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownCommand`] if no tracker owns `command`.
    pub fn configure(&self, command: &str, line: &str) -> Result<(), ConfigError> {
        let descriptor = self.command(command).ok_or_else(|| ConfigError::UnknownCommand(command.to_string()))?;
        if !self.trackers.iter().any(|tracker| tracker.configure(command, line)) {
            return Err(ConfigError::UnknownCommand(command.to_string()));
        }

        debug!("configured {command} with '{line}'");
        let mut configured = self.configured.lock().unwrap_or_else(PoisonError::into_inner);
        configured.retain(|(existing, _)| existing.name() != command);
        configured.push((descriptor, line.to_string()));
        Ok(())
    }

    /// Validate the configured option lines.
    ///
    /// A help option prints that command's help; an undeclared option prints
    /// the error and the help. Both go to stderr.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn check_commands(&self) -> Result<(), ConfigError> {
        let err = self.sinks.stderr();
        let configured = self.configured.lock().unwrap_or_else(PoisonError::into_inner);

        for (command, line) in configured.iter() {
            let options = OptionsLine::for_command(line, Arc::clone(command));

            let error = if options.has_help_option() {
                ConfigError::HelpRequested(command.name().to_string())
            } else if let Some(argument) = options.get_unknown_argument() {
                let error = ConfigError::UnknownArgument {
                    argument: argument.to_string(),
                    command: command.name().to_string(),
                };
                err.write_line(&error.to_string());
                error
            } else {
                continue;
            };

            for help in command.help_lines() {
                err.write_line(&help);
            }
            return Err(error);
        }
        Ok(())
    }

    // ========================================================================
    // Dumps
    // ========================================================================

    /// Register on-demand dumps and arm periodic dumps. Only the first call
    /// has an effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        for tracker in &self.trackers {
            Arc::clone(tracker).register_dumps(&self.dispatcher);
            Arc::clone(tracker).start(&self.scheduler);
        }
        info!("agent started with {} dumps", self.dispatcher.names().len());
    }

    /// Perform the dump named by `request` (`<dump>[,<options>]`, `help`,
    /// `help:<dump>`); returns whether it emitted output.
    pub fn perform_dump(&self, request: &str) -> bool {
        self.dispatcher.dispatch(request)
    }

    #[must_use]
    pub fn dump_names(&self) -> Vec<String> {
        self.dispatcher.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;

    fn context() -> (AgentContext, Arc<MemorySink>, Arc<MemorySink>) {
        let out = Arc::new(MemorySink::new());
        let err = Arc::new(MemorySink::new());
        let context = AgentContext::builder().console(out.clone(), err.clone()).build();
        (context, out, err)
    }

    #[test]
    fn test_command_table() {
        let (context, out, _err) = context();
        let names: Vec<String> = context.command_summaries().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "traceNativeAllocations");
        assert!(names.contains(&"traceOpenFiles".to_string()));
        assert!(names.contains(&"logGeneric5".to_string()));

        context.print_commands();
        let lines = out.take();
        assert_eq!(lines[0], "The following commands are supported:");
        assert_eq!(lines.last().map(String::as_str), Some("Use <command>,help to get further help for a specific command."));
    }

    #[test]
    fn test_configure_unknown_command() {
        let (context, _out, _err) = context();
        assert!(matches!(context.configure("traceEverything", ""), Err(ConfigError::UnknownCommand(_))));
        assert!(context.configure("traceLocaleChange", "logDest=stdout").is_ok());
        assert!(context.changes().is_enabled(crate::trackers::ChangeKind::Locale));
    }

    #[test]
    fn test_check_commands_reports_unknown_argument() {
        let (context, _out, err) = context();
        context.configure("traceNativeAllocations", "maxFrame=3").unwrap();

        let result = context.check_commands();
        assert!(matches!(result, Err(ConfigError::UnknownArgument { ref argument, .. }) if argument == "maxFrame"));
        let lines = err.take();
        assert_eq!(lines[0], "Unknown argument 'maxFrame' for command 'traceNativeAllocations'.");
        assert_eq!(lines[1], "Help for command 'traceNativeAllocations':");
    }

    #[test]
    fn test_check_commands_help() {
        let (context, _out, err) = context();
        context.configure("traceOpenFiles", "help").unwrap();
        assert!(matches!(context.check_commands(), Err(ConfigError::HelpRequested(_))));
        assert!(err.contains("Help for command 'traceOpenFiles':"));
    }

    #[test]
    fn test_start_registers_dumps() {
        let (context, out, _err) = context();
        context.configure("traceNativeAllocations", "").unwrap();
        assert!(context.check_commands().is_ok());
        context.start();
        context.start();

        let names = context.dump_names();
        assert!(names.contains(&"nativeAllocations".to_string()));
        assert!(names.contains(&"openFiles".to_string()));

        assert!(!context.perform_dump("help"));
        assert!(out.contains("nativeAllocations: Dump the currently live native memory allocations."));
    }
}
