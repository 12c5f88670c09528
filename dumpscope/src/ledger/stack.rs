//! Call stack capture for resource records
//!
//! Capturing only walks the stack and keeps raw instruction pointers; symbol
//! resolution is deferred until a record is actually rendered, and happens at
//! most once per stack.

use backtrace::Symbol;
use rustc_demangle::demangle;
use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Maximum number of raw frames kept per captured stack
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Symbol prefixes of the capture machinery, skipped at the top of a stack
const INTERNAL_PREFIXES: &[&str] = &[
    "backtrace::",
    "rustc_demangle::",
    "dumpscope::ledger::",
    "dumpscope::trackers::",
    "dumpscope::output::",
    "dumpscope::context::",
];

/// One resolved frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    #[must_use]
    pub fn new(function: &str, file: Option<&str>, line: Option<u32>) -> Self {
        Self { function: function.to_string(), file: file.map(str::to_string), line }
    }

    fn from_symbol(symbol: &Symbol) -> Self {
        let function = symbol
            .name()
            .map(|name| match name.as_str() {
                Some(raw) => format!("{:#}", demangle(raw)),
                None => name.to_string(),
            })
            .unwrap_or_else(|| "<unknown>".to_string());

        Self {
            function,
            file: symbol.filename().map(|f| f.display().to_string()),
            line: symbol.lineno(),
        }
    }

    fn is_internal(&self) -> bool {
        let name = self.function.trim_start_matches('<');
        INTERNAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({file}:{line})", self.function),
            (Some(file), None) => write!(f, "{} ({file})", self.function),
            _ => f.write_str(&self.function),
        }
    }
}

/// Stack captured at resource creation
#[derive(Debug, Clone, Default)]
pub struct CapturedStack {
    ips: Vec<usize>,
    resolved: OnceLock<Arc<[StackFrame]>>,
}

impl CapturedStack {
    /// Walk the current thread's stack, keeping at most `max_depth` frames.
    #[must_use]
    pub fn capture(max_depth: usize) -> Self {
        let mut ips = Vec::with_capacity(max_depth.min(DEFAULT_MAX_DEPTH));
        backtrace::trace(|frame| {
            ips.push(frame.ip() as usize);
            ips.len() < max_depth
        });
        Self { ips, resolved: OnceLock::new() }
    }

    /// Build an already resolved stack, innermost frame first.
    #[must_use]
    pub fn from_frames(frames: Vec<StackFrame>) -> Self {
        let resolved = OnceLock::new();
        let _ = resolved.set(Arc::from(frames));
        Self { ips: Vec::new(), resolved }
    }

    /// Resolved frames, innermost first, without the capture machinery.
    pub fn frames(&self) -> &[StackFrame] {
        self.resolved.get_or_init(|| resolve(&self.ips))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }
}

fn resolve(ips: &[usize]) -> Arc<[StackFrame]> {
    let mut frames = Vec::with_capacity(ips.len());
    for &ip in ips {
        let before = frames.len();
        backtrace::resolve(ip as *mut c_void, |symbol| frames.push(StackFrame::from_symbol(symbol)));
        if frames.len() == before {
            frames.push(StackFrame { function: format!("0x{ip:x}"), file: None, line: None });
        }
    }

    let internal = frames.iter().take_while(|frame| frame.is_internal()).count();
    frames.drain(..internal);
    Arc::from(frames)
}

/// Source of call stacks for new resource records
pub trait StackSource: Send + Sync {
    fn capture(&self) -> Arc<CapturedStack>;
}

/// Captures the real call stack with the `backtrace` crate
#[derive(Debug, Clone, Copy)]
pub struct BacktraceSource {
    max_depth: usize,
}

impl BacktraceSource {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Default for BacktraceSource {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl StackSource for BacktraceSource {
    fn capture(&self) -> Arc<CapturedStack> {
        Arc::new(CapturedStack::capture(self.max_depth))
    }
}
