//! On-demand dumps by name
//!
//! A request is `<dump>[,<options>]`. `help` lists the registered dumps and
//! `help:<dump>` prints the options of one dump.

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::DispatchError;
use crate::options::{CommandDescriptor, OptionsLine};
use crate::output::Sink;

/// Dump callback; returns whether anything was emitted
pub type DumpCallback = Arc<dyn Fn(&OptionsLine) -> bool + Send + Sync>;

struct RegisteredDump {
    command: Arc<CommandDescriptor>,
    callback: DumpCallback,
}

/// Registry of named dumps
pub struct DumpDispatcher {
    dumps: RwLock<BTreeMap<String, RegisteredDump>>,
    out: Arc<dyn Sink>,
    err: Arc<dyn Sink>,
}

impl DumpDispatcher {
    /// Help goes to `out`, request errors go to `err`.
    #[must_use]
    pub fn new(out: Arc<dyn Sink>, err: Arc<dyn Sink>) -> Self {
        Self { dumps: RwLock::new(BTreeMap::new()), out, err }
    }

    /// Register `callback` under the name of `command`, replacing any
    /// previous registration of that name.
    pub fn register(&self, command: Arc<CommandDescriptor>, callback: DumpCallback) {
        debug!("registered dump {}", command.name());
        self.dumps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.name().to_string(), RegisteredDump { command, callback });
    }

    /// Registered dump names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.dumps.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    /// Handle one request.
    ///
    /// Returns whether a dump emitted output.
    ///
    /// # Errors
    /// Returns a [`DispatchError`] for an unknown dump or help topic, or an
    /// option the dump does not declare.
    pub fn try_dispatch(&self, request: &str) -> Result<bool, DispatchError> {
        if request == "help" {
            self.print_dump_list();
            return Ok(false);
        }

        if let Some(topic) = request.strip_prefix("help:") {
            let command = self.command(topic).ok_or_else(|| DispatchError::UnknownHelpTopic(topic.to_string()))?;
            self.print_help(&command);
            return Ok(false);
        }

        let (name, rest) = request.split_once(',').unwrap_or((request, ""));
        let (command, callback) = {
            let dumps = self.dumps.read().unwrap_or_else(PoisonError::into_inner);
            let dump = dumps.get(name).ok_or_else(|| DispatchError::UnknownDump(name.to_string()))?;
            (Arc::clone(&dump.command), Arc::clone(&dump.callback))
        };

        let options = OptionsLine::for_command(rest, Arc::clone(&command));
        if options.has_help_option() {
            self.print_help(&command);
            return Ok(false);
        }
        if let Some(argument) = options.get_unknown_argument() {
            return Err(DispatchError::UnknownArgument {
                argument: argument.to_string(),
                dump: name.to_string(),
            });
        }

        info!("performing {name} dump");
        Ok(callback(&options))
    }

    /// Handle one request, reporting failures on the error sink.
    pub fn dispatch(&self, request: &str) -> bool {
        match self.try_dispatch(request) {
            Ok(emitted) => emitted,
            Err(err) => {
                self.err.write_line(&err.to_string());
                if let DispatchError::UnknownArgument { dump, .. } = &err {
                    if let Some(command) = self.command(dump) {
                        for line in command.help_lines() {
                            self.err.write_line(&line);
                        }
                    }
                }
                false
            }
        }
    }

    fn command(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.dumps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|dump| Arc::clone(&dump.command))
    }

    fn print_dump_list(&self) {
        self.out.write_line("The following dumps are supported:");
        for dump in self.dumps.read().unwrap_or_else(PoisonError::into_inner).values() {
            self.out.write_line(&format!("{}: {}", dump.command.name(), dump.command.description()));
        }
        self.out.write_line("Use dump=help:<dump> for all options for a specific dump.");
    }

    fn print_help(&self, command: &CommandDescriptor) {
        for line in command.help_lines() {
            self.out.write_line(&line);
        }
    }
}
