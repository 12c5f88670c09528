//! Domain model for dumpscope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;

// Re-export the probe ABI types for convenience
pub use dumpscope_common::{Handle, SlotValue};

pub use errors::{
    ConfigError, DispatchError, ExportError, LedgerError, OptionError, SlotError,
};
