//! Comparison report log
//!
//! Human-readable status lines go to one log file for the lifetime of the
//! logger and are mirrored to stdout. Writers on different threads are
//! serialised so lines never interleave.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only report sink shared by reference
pub struct ReportLogger {
    path: Option<PathBuf>,
    sink: Mutex<Box<dyn Write + Send>>,
    echo: bool,
}

impl ReportLogger {
    /// Create (or truncate) the log file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create report log: {:?}", path))?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            sink: Mutex::new(Box::new(BufWriter::new(file))),
            echo: true,
        })
    }

    /// Log into an arbitrary writer
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            path: None,
            sink: Mutex::new(Box::new(writer)),
            echo: true,
        }
    }

    /// Enable or disable the stdout mirror
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Log file location, if backed by a file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one line
    ///
    /// A write failure is reported through tracing and otherwise ignored;
    /// losing a report line must not stop the comparison.
    pub fn log(&self, line: &str) {
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
            tracing::warn!("Failed to write report line: {}", e);
        }
        if self.echo {
            println!("{}", line);
        }
    }
}
