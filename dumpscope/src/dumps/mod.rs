//! Dump engine
//!
//! - [`filter`]: snapshot gates and per-record inclusion
//! - [`reporter`]: rendering with dump-to-dump throttling
//! - [`scheduler`]: periodic dumps on a background thread
//! - [`dispatcher`]: named on-demand dumps

pub mod dispatcher;
pub mod filter;
pub mod reporter;
pub mod scheduler;

pub use dispatcher::{DumpCallback, DumpDispatcher};
pub use filter::{DumpFilter, FILTER_OPTIONS};
pub use reporter::{format_timestamp, report, DumpThrottle};
pub use scheduler::{process_exit, DumpScheduler, ExitHook, ScheduleOptions, Sleeper, SystemSleeper};
