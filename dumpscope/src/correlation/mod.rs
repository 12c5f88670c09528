//! Call-site correlation
//!
//! Assembles the fragments written by several probes at one call site into a
//! single event, per thread.

pub mod slots;

pub use slots::CorrelationSlots;
