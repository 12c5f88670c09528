//! # Shared Probe ABI Types (instrumentation ↔ core)
//!
//! Defines the values that instrumented call sites hand to the diagnostic
//! core. The bytecode-rewriting layer that injects those calls is not part of
//! this workspace; it only needs to agree on these types.
//!
//! ## Key Types
//!
//! - [`Handle`] - Opaque resource identifier (native address, descriptor, ...)
//! - [`SlotValue`] - One typed fragment staged into a correlation slot

#![no_std]

extern crate alloc;

use alloc::string::{String, ToString};
use core::fmt;

// ============================================================================
// Logger Layout
// ============================================================================

/// Number of generic logger families (`logGeneric1` .. `logGeneric5`)
pub const MAX_GENERIC_LOGGERS: usize = 5;

/// Position of the requested size in an allocation event
pub const ALLOC_SIZE_SLOT: usize = 0;

/// Position of the previous pointer in a reallocation event
///
/// Left empty (or zero) for plain allocations.
pub const ALLOC_OLD_PTR_SLOT: usize = 1;

/// Position of the path in an open-file event
pub const FILE_PATH_SLOT: usize = 0;

/// Position of the access mode in an open-file event
pub const FILE_MODE_SLOT: usize = 1;

// ============================================================================
// Handle
// ============================================================================

/// Opaque resource identifier used as the ledger key
///
/// `Handle(0)` is the null handle: probes use it for "no previous pointer"
/// and for failed allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u64);

impl Handle {
    /// The null handle
    pub const NULL: Handle = Handle(0);

    /// Returns true for the null handle
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Handle(raw)
    }
}

// ============================================================================
// Slot Values
// ============================================================================

/// One value written by a probe into a correlation slot
///
/// Positions that were never written before an event is finalized read back
/// as [`SlotValue::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SlotValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Opaque reference (object identity, native pointer)
    Ref(u64),
}

impl SlotValue {
    /// Returns true if nothing was staged at this position
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SlotValue::Null)
    }

    /// Unsigned view of the value, used for sizes and pointers
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SlotValue::Int(v) => u64::try_from(*v).ok(),
            SlotValue::Ref(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of any numeric value
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SlotValue::Int(v) => Some(*v as f64),
            SlotValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String view, only for string values
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SlotValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Null => f.write_str("null"),
            SlotValue::Bool(v) => write!(f, "{v}"),
            SlotValue::Int(v) => write!(f, "{v}"),
            SlotValue::Float(v) => write!(f, "{v}"),
            SlotValue::Str(v) => f.write_str(v),
            SlotValue::Ref(v) => write!(f, "0x{v:x}"),
        }
    }
}

impl From<bool> for SlotValue {
    fn from(v: bool) -> Self {
        SlotValue::Bool(v)
    }
}

impl From<i64> for SlotValue {
    fn from(v: i64) -> Self {
        SlotValue::Int(v)
    }
}

impl From<i32> for SlotValue {
    fn from(v: i32) -> Self {
        SlotValue::Int(i64::from(v))
    }
}

impl From<f64> for SlotValue {
    fn from(v: f64) -> Self {
        SlotValue::Float(v)
    }
}

impl From<&str> for SlotValue {
    fn from(v: &str) -> Self {
        SlotValue::Str(v.to_string())
    }
}

impl From<String> for SlotValue {
    fn from(v: String) -> Self {
        SlotValue::Str(v)
    }
}

impl From<Handle> for SlotValue {
    fn from(v: Handle) -> Self {
        SlotValue::Ref(v.0)
    }
}
