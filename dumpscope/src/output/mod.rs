//! Text output destinations

pub mod sink;

pub use sink::{log_line, log_with_stack, FileSink, LogDest, MemorySink, NullSink, Sink, SinkRegistry, StderrSink, StdoutSink};
