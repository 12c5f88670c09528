//! Structured error types for dumpscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::Handle;
use thiserror::Error;

/// Failure to interpret one option value of a configuration line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("Could not parse integer value '{value}'")]
    InvalidInteger { value: String },

    #[error("Could not parse number '{value}'")]
    InvalidNumber { value: String },

    #[error("Unknown unit '{unit}'.")]
    UnknownUnit { unit: char },

    #[error("Value out of range '{value}'")]
    OutOfRange { value: String },

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Option requires a value")]
    MissingValue,
}

/// Consistency violations of the resource ledger
///
/// Both variants point at a bug in the calling instrumentation, never at user
/// input.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Handle {0} is already tracked")]
    DuplicateHandle(Handle),

    #[error("Handle {0} is not tracked")]
    UnknownHandle(Handle),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("Logger index {index} out of range (only {capacity} loggers)")]
    LoggerOutOfRange { index: usize, capacity: usize },

    #[error("Slot position {position} out of range (at most {max} positions)")]
    PositionOutOfRange { position: usize, max: usize },
}

/// Failure to route an on-demand dump request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No dump registered for dump type '{0}'")]
    UnknownDump(String),

    #[error("Could not find dump type '{0}'. Use dump=help for a list of supported types.")]
    UnknownHelpTopic(String),

    #[error("Unknown argument '{argument}' for dump '{dump}'.")]
    UnknownArgument { argument: String, dump: String },
}

/// Startup configuration problems; any of them aborts tracing setup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Help requested for command '{0}'")]
    HelpRequested(String),

    #[error("Unknown argument '{argument}' for command '{command}'.")]
    UnknownArgument { argument: String, command: String },

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::DuplicateHandle(Handle(0x1000));
        assert_eq!(err.to_string(), "Handle 0x1000 is already tracked");
    }

    #[test]
    fn test_unknown_argument_error() {
        let err = ConfigError::UnknownArgument {
            argument: "maxFrame".to_string(),
            command: "traceNativeAllocations".to_string(),
        };
        assert!(err.to_string().contains("maxFrame"));
        assert!(err.to_string().contains("traceNativeAllocations"));
    }

    #[test]
    fn test_unknown_unit_error() {
        let err = OptionError::UnknownUnit { unit: 'x' };
        assert_eq!(err.to_string(), "Unknown unit 'x'.");
    }
}
