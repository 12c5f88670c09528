//! Resource ledger and call stack capture

pub mod stack;
pub mod store;

pub use stack::{BacktraceSource, CapturedStack, StackFrame, StackSource, DEFAULT_MAX_DEPTH};
pub use store::{Ledger, ResourceLedger, ResourceRecord};
