//! Output sinks resolved from `logDest`
//!
//! Dumps, traces and help text are tool output, not diagnostics: they go to a
//! [`Sink`] chosen per command, never through the `log` facade.

use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::ledger::StackSource;
use crate::options::{OptionsLine, LOG_DEST, LOG_WITH_STACK};

/// Parsed `logDest` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDest {
    Stdout,
    Stderr,
    /// Output disabled
    None,
    File { path: PathBuf, append: bool },
}

impl LogDest {
    #[must_use]
    pub fn parse(dest: &str) -> Self {
        match dest {
            "stdout" => LogDest::Stdout,
            "stderr" => LogDest::Stderr,
            "none" => LogDest::None,
            _ => match dest.strip_prefix('+') {
                Some(path) => LogDest::File { path: PathBuf::from(path), append: true },
                None => LogDest::File { path: PathBuf::from(dest), append: false },
            },
        }
    }
}

/// Line-oriented text output
pub trait Sink: Send + Sync {
    fn write_line(&self, line: &str);

    /// False for a sink that discards everything
    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl Sink for StderrSink {
    fn write_line(&self, line: &str) {
        eprintln!("{line}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn write_line(&self, _line: &str) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// File output that switches to the error sink after the first failed write
pub struct FileSink {
    dest: String,
    file: Mutex<Option<LineWriter<File>>>,
    fallback: Arc<dyn Sink>,
}

impl FileSink {
    /// # Errors
    /// Returns the I/O error if the file cannot be opened.
    pub fn open(dest: &str, path: &Path, append: bool, fallback: Arc<dyn Sink>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).write(true).append(append).truncate(!append).open(path)?;
        Ok(Self { dest: dest.to_string(), file: Mutex::new(Some(LineWriter::new(file))), fallback })
    }
}

impl Sink for FileSink {
    fn write_line(&self, line: &str) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = file.as_mut() {
            match writeln!(writer, "{line}") {
                Ok(()) => return,
                Err(e) => {
                    warn!("write to {} failed: {e}", self.dest);
                    self.fallback
                        .write_line(&format!("Could not write to file '{}'. Using stderr instead.", self.dest));
                    *file = None;
                }
            }
        }
        self.fallback.write_line(line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return all collected lines
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).iter().any(|l| l.contains(text))
    }
}

impl Sink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line.to_string());
    }
}

/// Resolves and caches sinks by destination string
pub struct SinkRegistry {
    stdout: Arc<dyn Sink>,
    stderr: Arc<dyn Sink>,
    none: Arc<dyn Sink>,
    files: Mutex<HashMap<String, Arc<dyn Sink>>>,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::with_console(Arc::new(StdoutSink), Arc::new(StderrSink))
    }
}

impl SinkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose `stdout` and `stderr` destinations are the given sinks
    #[must_use]
    pub fn with_console(stdout: Arc<dyn Sink>, stderr: Arc<dyn Sink>) -> Self {
        Self { stdout, stderr, none: Arc::new(NullSink), files: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn stdout(&self) -> Arc<dyn Sink> {
        Arc::clone(&self.stdout)
    }

    #[must_use]
    pub fn stderr(&self) -> Arc<dyn Sink> {
        Arc::clone(&self.stderr)
    }

    /// Sink for the line's `logDest` (default `stderr`)
    #[must_use]
    pub fn resolve(&self, options: &OptionsLine) -> Arc<dyn Sink> {
        let dest = options.get_string(LOG_DEST, Some("stderr")).unwrap_or("stderr");
        self.resolve_dest(dest)
    }

    #[must_use]
    pub fn resolve_dest(&self, dest: &str) -> Arc<dyn Sink> {
        let (path, append) = match LogDest::parse(dest) {
            LogDest::Stdout => return self.stdout(),
            LogDest::Stderr => return self.stderr(),
            LogDest::None => return Arc::clone(&self.none),
            LogDest::File { path, append } => (path, append),
        };

        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = files.get(dest) {
            return Arc::clone(sink);
        }

        let sink: Arc<dyn Sink> = match FileSink::open(dest, &path, append, self.stderr()) {
            Ok(sink) => {
                debug!("opened output file {}", path.display());
                Arc::new(sink)
            }
            Err(e) => {
                warn!("could not open {}: {e}", path.display());
                self.stderr.write_line(&format!("Could not open file '{dest}' for output. Using stderr instead."));
                self.stderr()
            }
        };
        files.insert(dest.to_string(), Arc::clone(&sink));
        sink
    }
}

/// Write `message` and, if `logWithStack` is set, the caller's stack.
pub fn log_line(sink: &dyn Sink, options: &OptionsLine, stacks: &dyn StackSource, message: &str) {
    if !sink.is_enabled() {
        return;
    }

    if options.get_boolean(LOG_WITH_STACK, false) {
        log_with_stack(sink, stacks, message);
    } else {
        sink.write_line(message);
    }
}

/// Write `message` followed by the caller's stack, one `\t<frame>` per line.
pub fn log_with_stack(sink: &dyn Sink, stacks: &dyn StackSource, message: &str) {
    if !sink.is_enabled() {
        return;
    }

    sink.write_line(message);
    for frame in stacks.capture().frames() {
        sink.write_line(&format!("\t{frame}"));
    }
}
