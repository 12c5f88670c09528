//! Live-resource ledger
//!
//! Maps each tracked handle to the record created when the resource was
//! acquired, and keeps the total size of all records.
//!
//! ## Invariants
//!
//! - `total_size` is the sum of the sizes of all present records
//! - Adding a present handle fails with [`LedgerError::DuplicateHandle`]
//! - Removing an absent handle fails with [`LedgerError::UnknownHandle`]
//!
//! [`ResourceLedger`] wraps a [`Ledger`] in one mutex; reports work on a
//! [`ResourceLedger::snapshot`] so rendering never holds the live lock.

#![allow(clippy::module_name_repetitions)]

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::CapturedStack;
use crate::domain::{Handle, LedgerError};

/// One live resource
#[derive(Debug, Clone)]
pub struct ResourceRecord<D = ()> {
    pub handle: Handle,
    pub size: u64,
    pub created_at: SystemTime,
    pub stack: Arc<CapturedStack>,
    /// Tracker-specific data (file path and mode, ...)
    pub detail: D,
}

impl<D> ResourceRecord<D> {
    #[must_use]
    pub fn new(handle: Handle, size: u64, stack: Arc<CapturedStack>, detail: D) -> Self {
        Self { handle, size, created_at: SystemTime::now(), stack, detail }
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = created_at;
        self
    }

    /// Age at `now`; zero for records stamped in the future
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or(Duration::ZERO)
    }
}

/// Handle to record map plus running total
#[derive(Debug, Clone)]
pub struct Ledger<D = ()> {
    records: HashMap<Handle, ResourceRecord<D>>,
    total_size: u64,
}

impl<D> Default for Ledger<D> {
    fn default() -> Self {
        Self { records: HashMap::new(), total_size: 0 }
    }
}

impl<D> Ledger<D> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for a newly acquired resource.
    ///
    /// # Errors
    /// Returns [`LedgerError::DuplicateHandle`] if the handle is present.
    pub fn add(&mut self, record: ResourceRecord<D>) -> Result<(), LedgerError> {
        if self.records.contains_key(&record.handle) {
            return Err(LedgerError::DuplicateHandle(record.handle));
        }
        self.total_size += record.size;
        self.records.insert(record.handle, record);
        Ok(())
    }

    /// Remove the record of a released resource.
    ///
    /// # Errors
    /// Returns [`LedgerError::UnknownHandle`] if the handle is absent.
    pub fn remove(&mut self, handle: Handle) -> Result<ResourceRecord<D>, LedgerError> {
        let record = self.records.remove(&handle).ok_or(LedgerError::UnknownHandle(handle))?;
        self.total_size -= record.size;
        Ok(record)
    }

    /// Move a resource from `old` to `record.handle`.
    ///
    /// A null `old` makes this a plain [`Ledger::add`]. An untracked `old` is
    /// skipped. A zero-sized `record` makes this a pure release of `old`.
    ///
    /// # Errors
    /// Returns [`LedgerError::DuplicateHandle`] if the new handle is present
    /// after `old` was removed.
    pub fn reallocate(&mut self, old: Handle, record: ResourceRecord<D>) -> Result<(), LedgerError> {
        if !old.is_null() {
            if let Err(err) = self.remove(old) {
                debug!("reallocate from untracked handle: {err}");
            }
        }

        if record.size == 0 {
            return Ok(());
        }
        self.add(record)
    }

    /// Insert `record`, replacing any record at the same handle.
    pub fn replace(&mut self, record: ResourceRecord<D>) -> Option<ResourceRecord<D>> {
        let previous = self.records.remove(&record.handle);
        if let Some(previous) = &previous {
            self.total_size -= previous.size;
        }
        self.total_size += record.size;
        self.records.insert(record.handle, record);
        previous
    }

    /// Keep only the records for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&ResourceRecord<D>) -> bool) -> usize {
        let before = self.records.len();
        let mut removed_size = 0;
        self.records.retain(|_, record| {
            let kept = keep(record);
            if !kept {
                removed_size += record.size;
            }
            kept
        });
        self.total_size -= removed_size;
        before - self.records.len()
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&ResourceRecord<D>> {
        self.records.get(&handle)
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.records.contains_key(&handle)
    }

    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord<D>> {
        self.records.values()
    }

    /// Records ordered by creation time, oldest first
    #[must_use]
    pub fn records_by_age(&self) -> Vec<&ResourceRecord<D>> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by_key(|record| (record.created_at, record.handle));
        records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// Ledger shared between probe threads and reporters
#[derive(Debug)]
pub struct ResourceLedger<D = ()> {
    inner: Mutex<Ledger<D>>,
}

impl<D> Default for ResourceLedger<D> {
    fn default() -> Self {
        Self { inner: Mutex::new(Ledger::new()) }
    }
}

impl<D: Clone> ResourceLedger<D> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger<D>> {
        // A panic elsewhere must not disable tracking
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Errors
    /// See [`Ledger::add`].
    pub fn add(&self, record: ResourceRecord<D>) -> Result<(), LedgerError> {
        self.lock().add(record)
    }

    /// # Errors
    /// See [`Ledger::remove`].
    pub fn remove(&self, handle: Handle) -> Result<ResourceRecord<D>, LedgerError> {
        self.lock().remove(handle)
    }

    /// # Errors
    /// See [`Ledger::reallocate`].
    pub fn reallocate(&self, old: Handle, record: ResourceRecord<D>) -> Result<(), LedgerError> {
        self.lock().reallocate(old, record)
    }

    pub fn replace(&self, record: ResourceRecord<D>) -> Option<ResourceRecord<D>> {
        self.lock().replace(record)
    }

    pub fn retain(&self, keep: impl FnMut(&ResourceRecord<D>) -> bool) -> usize {
        self.lock().retain(keep)
    }

    /// Independent copy of the ledger taken under one lock acquisition
    #[must_use]
    pub fn snapshot(&self) -> Ledger<D> {
        self.lock().clone()
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.lock().total_size()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(handle: u64, size: u64) -> ResourceRecord {
        ResourceRecord::new(Handle(handle), size, Arc::new(CapturedStack::default()), ())
    }

    fn sum(ledger: &Ledger) -> u64 {
        ledger.records().map(|r| r.size).sum()
    }

    #[test]
    fn test_conservation_over_mixed_operations() {
        let mut ledger = Ledger::new();
        ledger.add(record(0x10, 100)).unwrap();
        ledger.add(record(0x20, 200)).unwrap();
        ledger.add(record(0x30, 300)).unwrap();
        ledger.remove(Handle(0x20)).unwrap();
        ledger.reallocate(Handle(0x10), record(0x40, 50)).unwrap();
        ledger.reallocate(Handle::NULL, record(0x50, 5)).unwrap();

        assert_eq!(ledger.total_size(), 355);
        assert_eq!(ledger.total_size(), sum(&ledger));
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut ledger = Ledger::new();
        ledger.add(record(0x10, 100)).unwrap();
        assert_eq!(ledger.add(record(0x10, 7)), Err(LedgerError::DuplicateHandle(Handle(0x10))));
        assert_eq!(ledger.total_size(), 100);
    }

    #[test]
    fn test_unknown_remove_rejected() {
        let mut ledger: Ledger = Ledger::new();
        assert_eq!(ledger.remove(Handle(0x99)).unwrap_err(), LedgerError::UnknownHandle(Handle(0x99)));
        assert_eq!(ledger.total_size(), 0);
    }

    #[test]
    fn test_realloc_to_zero_is_free() {
        let mut ledger = Ledger::new();
        ledger.add(record(0x10, 100)).unwrap();
        ledger.add(record(0x20, 30)).unwrap();
        ledger.reallocate(Handle(0x10), record(0x11, 0)).unwrap();

        assert!(!ledger.contains(Handle(0x10)));
        assert!(!ledger.contains(Handle(0x11)));
        assert_eq!(ledger.total_size(), 30);
    }

    #[test]
    fn test_realloc_from_null_is_add() {
        let mut a = Ledger::new();
        let mut b = Ledger::new();
        a.reallocate(Handle::NULL, record(0x10, 64)).unwrap();
        b.add(record(0x10, 64)).unwrap();

        assert_eq!(a.total_size(), b.total_size());
        assert_eq!(a.get(Handle(0x10)).map(|r| r.size), b.get(Handle(0x10)).map(|r| r.size));
    }

    #[test]
    fn test_realloc_from_untracked_adds_new_size() {
        let mut ledger = Ledger::new();
        ledger.reallocate(Handle(0x77), record(0x10, 64)).unwrap();
        assert_eq!(ledger.total_size(), 64);
    }

    #[test]
    fn test_realloc_in_place() {
        let mut ledger = Ledger::new();
        ledger.add(record(0x10, 64)).unwrap();
        ledger.reallocate(Handle(0x10), record(0x10, 128)).unwrap();
        assert_eq!(ledger.total_size(), 128);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_replace_and_retain_keep_total() {
        let mut ledger = Ledger::new();
        ledger.add(record(0x10, 10)).unwrap();
        ledger.add(record(0x20, 20)).unwrap();
        assert!(ledger.replace(record(0x10, 15)).is_some());
        assert_eq!(ledger.total_size(), 35);

        assert_eq!(ledger.retain(|r| r.handle != Handle(0x20)), 1);
        assert_eq!(ledger.total_size(), 15);
        assert_eq!(ledger.total_size(), sum(&ledger));
    }

    #[test]
    fn test_records_by_age() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let mut ledger = Ledger::new();
        ledger.add(record(0x10, 1).with_created_at(base + Duration::from_secs(5))).unwrap();
        ledger.add(record(0x20, 1).with_created_at(base)).unwrap();

        let handles: Vec<_> = ledger.records_by_age().iter().map(|r| r.handle).collect();
        assert_eq!(handles, vec![Handle(0x20), Handle(0x10)]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let shared = ResourceLedger::new();
        shared.add(record(0x10, 100)).unwrap();

        let mut snapshot = shared.snapshot();
        snapshot.remove(Handle(0x10)).unwrap();
        snapshot.add(record(0x20, 1)).unwrap();

        assert_eq!(shared.total_size(), 100);
        assert_eq!(shared.len(), 1);
        assert_eq!(snapshot.total_size(), 1);
    }

    #[test]
    fn test_concurrent_adds_conserve_total() {
        let shared = Arc::new(ResourceLedger::<()>::new());
        let workers: Vec<_> = (0..4u64)
            .map(|t| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        shared.add(record(t * 1000 + i + 1, 8)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.total_size(), 4 * 100 * 8);
        assert_eq!(snapshot.total_size(), sum(&snapshot));
    }

    #[test]
    fn test_record_age() {
        let created = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let r = record(1, 1).with_created_at(created);
        assert_eq!(r.age(created + Duration::from_secs(20)), Duration::from_secs(20));
        assert_eq!(r.age(created - Duration::from_secs(1)), Duration::ZERO);
    }
}
