//! Per-thread correlation slots
//!
//! A logical event at an instrumented call site is assembled from several
//! probe calls: the first probes stage values at fixed positions and the last
//! probe finalizes, reading every staged value back in position order and
//! clearing the staging area. Staging lives in thread-local storage keyed by
//! (slot table, logger index), so probes on different threads never see each
//! other's values and no lock is taken on the probe path.
//!
//! ## Reentrancy
//!
//! One event per (logger, thread) can be open at a time. If a call site
//! re-enters itself on the same thread before the outer call finalizes, the
//! inner probes write into the outer event: values at disjoint positions
//! interleave, values at the same position overwrite, and the inner
//! finalize consumes the outer values. Event boundaries are defined by
//! finalize, and changing that would change what a probe sequence means.

use log::{debug, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::domain::{SlotError, SlotValue};

/// Positions available to one event
pub const MAX_POSITIONS: usize = 64;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static STAGING: RefCell<HashMap<(u64, usize), Vec<SlotValue>>> = RefCell::new(HashMap::new());
}

/// Slot table for a fixed number of loggers
///
/// Independent tables never share staging, even on the same thread.
#[derive(Debug)]
pub struct CorrelationSlots {
    id: u64,
    /// Published on a logger's first use
    loggers: Box<[OnceLock<()>]>,
}

impl CorrelationSlots {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            loggers: (0..capacity).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Check `logger` against the capacity, publishing it on first use.
    fn logger(&self, logger: usize) -> Result<(), SlotError> {
        let cell = self
            .loggers
            .get(logger)
            .ok_or(SlotError::LoggerOutOfRange { index: logger, capacity: self.loggers.len() })?;

        cell.get_or_init(|| debug!("correlation logger {logger} initialized"));
        Ok(())
    }

    /// Write `value` at `position` of the current thread's open event.
    ///
    /// # Errors
    /// Returns [`SlotError::LoggerOutOfRange`] if `logger` exceeds the capacity
    /// and [`SlotError::PositionOutOfRange`] for a position past
    /// [`MAX_POSITIONS`].
    pub fn stage(&self, logger: usize, position: usize, value: SlotValue) -> Result<(), SlotError> {
        self.logger(logger)?;
        check_position(position)?;
        self.with_staging(logger, |values| {
            if values.len() <= position {
                values.resize(position + 1, SlotValue::Null);
            }
            values[position] = value;
            position
        });
        Ok(())
    }

    /// Append `value` after the highest staged position.
    ///
    /// # Errors
    /// Returns [`SlotError::LoggerOutOfRange`] if `logger` exceeds the capacity
    /// and [`SlotError::PositionOutOfRange`] once the event is full.
    pub fn push(&self, logger: usize, value: SlotValue) -> Result<usize, SlotError> {
        self.logger(logger)?;
        self.with_staging(logger, |values| {
            check_position(values.len())?;
            values.push(value);
            Ok(values.len() - 1)
        })
        .unwrap_or(Ok(0))
    }

    /// Close the current thread's event and return its values in position
    /// order. Positions never written read as [`SlotValue::Null`].
    ///
    /// # Errors
    /// Returns [`SlotError::LoggerOutOfRange`] if `logger` exceeds the capacity.
    pub fn finalize(&self, logger: usize) -> Result<Vec<SlotValue>, SlotError> {
        self.logger(logger)?;
        let key = (self.id, logger);
        let values = STAGING
            .try_with(|staging| staging.borrow_mut().remove(&key))
            .ok()
            .flatten()
            .unwrap_or_default();
        Ok(values)
    }

    /// Stage `last` as the final value and close the event. The event is
    /// closed even when `last` does not fit.
    ///
    /// # Errors
    /// Returns [`SlotError::LoggerOutOfRange`] if `logger` exceeds the capacity
    /// and [`SlotError::PositionOutOfRange`] if the event was already full.
    pub fn finalize_with(&self, logger: usize, last: SlotValue) -> Result<Vec<SlotValue>, SlotError> {
        let pushed = self.push(logger, last);
        let values = self.finalize(logger)?;
        pushed.map(|_| values)
    }

    fn with_staging<R>(&self, logger: usize, f: impl FnOnce(&mut Vec<SlotValue>) -> R) -> Option<R> {
        let key = (self.id, logger);
        match STAGING.try_with(|staging| f(staging.borrow_mut().entry(key).or_default())) {
            Ok(result) => Some(result),
            Err(_) => {
                // Thread-local storage is gone during thread teardown
                warn!("correlation slot write for logger {logger} dropped during thread exit");
                None
            }
        }
    }
}

fn check_position(position: usize) -> Result<(), SlotError> {
    if position < MAX_POSITIONS {
        Ok(())
    } else {
        Err(SlotError::PositionOutOfRange { position, max: MAX_POSITIONS })
    }
}

impl Drop for CorrelationSlots {
    fn drop(&mut self) {
        let id = self.id;
        let _ = STAGING.try_with(|staging| staging.borrow_mut().retain(|(table, _), _| *table != id));
    }
}
