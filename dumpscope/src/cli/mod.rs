//! Command-line interface of the demo host

pub mod args;

pub use args::{split_agent_args, split_command_line, Args};
