//! # dumpscope - In-Process Live Resource Tracing
//!
//! dumpscope tracks live resources of a running program (native memory
//! blocks, open files) from lightweight probes placed at the call sites that
//! create and release them, and dumps what is still alive on demand or on a
//! schedule. Side loggers report arbitrary probe values and changes of
//! process-wide settings.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Instrumented Program                       │
//! │        malloc / realloc / free, open / close, setters           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ probe calls (value in, value out)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │ Correlation  │──▶│   Trackers   │──▶│   Ledgers    │         │
//! │  │    Slots     │   │              │   │ (+ stacks)   │         │
//! │  └──────────────┘   └──────┬───────┘   └──────┬───────┘         │
//! │                            │ log lines        │ snapshots       │
//! │                            ▼                  ▼                 │
//! │                    ┌──────────────┐   ┌──────────────┐          │
//! │                    │ Output Sinks │◀──│ Dump Engine  │          │
//! │                    │  (logDest)   │   │ filter/sched │          │
//! │                    └──────────────┘   └──────────────┘          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`options`]: option lines (`key=value,...`) and command descriptors
//! - [`correlation`]: per-thread staging of multi-probe events
//! - [`ledger`]: live-resource ledgers and call stack capture
//! - [`dumps`]: dump filters, throttled reports, periodic scheduling and
//!   the on-demand dispatcher
//! - [`output`]: `stdout` / `stderr` / file sinks selected by `logDest`
//! - [`trackers`]: allocation, open-file, generic and setting-change trackers
//! - [`context`]: the agent context owning all of the above
//! - [`export`]: JSON snapshot export
//! - [`cli`]: arguments of the demo host binary
//! - [`domain`]: shared types and errors
//!
//! ## Typical Usage
//!
//! ```no_run
//! use dumpscope::context::AgentContext;
//! use dumpscope::domain::Handle;
//!
//! let context = AgentContext::default();
//! context.configure("traceNativeAllocations", "dumpCount=3,dumpInterval=10m").unwrap();
//! context.check_commands().unwrap();
//! context.start();
//!
//! let allocations = context.allocations();
//! allocations.log_size(4096);
//! let block = allocations.log_result(Handle(0x7f00_0000_1000));
//!
//! context.perform_dump("nativeAllocations,logDest=stdout,minStackSize=1k");
//! allocations.log_free(block);
//! ```

pub mod cli;
pub mod context;
pub mod correlation;
pub mod domain;
pub mod dumps;
pub mod export;
pub mod ledger;
pub mod options;
pub mod output;
pub mod trackers;
