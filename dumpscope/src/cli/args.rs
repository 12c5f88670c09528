//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::domain::ConfigError;
use crate::options::split_unescaped;

#[derive(Parser, Debug)]
#[command(
    name = "dumpscope",
    about = "Trace live resources of a running workload and dump them on demand",
    after_help = "\
EXAMPLES:
    dumpscope --trace traceNativeAllocations,dumpCount=3,dumpInterval=10s
    dumpscope --trace traceOpenFiles,logDest=+files.log --duration 60
    dumpscope --trace traceNativeAllocations --export snapshot.json
    dumpscope --agent-args traceOpenFiles,logDest=stdout,logGeneric1,oncePerStack
    dumpscope --list

While running, each line read from stdin is a dump request, e.g.
'nativeAllocations,minStackSize=1k', 'help' or 'help:openFiles'."
)]
pub struct Args {
    /// Enable a command: `<command>[,<option>=<value>...]` (repeatable)
    #[arg(short, long = "trace", value_name = "LINE")]
    pub traces: Vec<String>,

    /// Agent-style configuration: `<command>[,key=value...][,<command>...]`
    #[arg(long, value_name = "ARGS")]
    pub agent_args: Option<String>,

    /// List the supported commands and exit
    #[arg(long)]
    pub list: bool,

    /// Export the allocation snapshot as JSON on shutdown
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Milliseconds between workload steps
    #[arg(long, default_value = "50", value_name = "MS")]
    pub step_ms: u64,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Split `<command>[,<options>]` into the command name and its option line.
#[must_use]
pub fn split_command_line(line: &str) -> (&str, &str) {
    let line = line.trim();
    line.split_once(',').unwrap_or((line, ""))
}

/// Split an agent-style string into `(command, option line)` groups.
///
/// Segments are separated by commas not preceded by a backslash, as in an
/// option line. A segment naming a command
/// (as decided by `is_command`) starts a new group; every other segment is an
/// option of the current group, escapes intact.
///
/// # Errors
/// Returns [`ConfigError::UnknownCommand`] for options before the first
/// command.
pub fn split_agent_args(
    args: &str,
    is_command: impl Fn(&str) -> bool,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut groups: Vec<(String, Vec<&str>)> = Vec::new();

    for segment in split_unescaped(args, ',', usize::MAX) {
        if segment.is_empty() {
            continue;
        }
        if is_command(segment) {
            groups.push((segment.to_string(), Vec::new()));
            continue;
        }
        match groups.last_mut() {
            Some((_, options)) => options.push(segment),
            None => return Err(ConfigError::UnknownCommand(segment.to_string())),
        }
    }

    Ok(groups.into_iter().map(|(command, options)| (command, options.join(","))).collect())
}
