//! Log Console
//!
//! `log` backend for hosts without a logger of their own. Each record is
//! written as one `[LEVEL] message` line into any [`fmt::Write`] sink, such
//! as a serial port driver.
//!
//! # Design
//! - The sink sits behind a spinlock, so lines from concurrent callers
//!   never interleave
//! - Sink errors are dropped; logging never fails the caller

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Line-oriented `log` backend over a locked sink.
pub struct Console<W> {
    sink: Mutex<W>,
    level: LevelFilter,
}

impl<W: Write + Send> Console<W> {
    /// Create a console passing records up to `level`.
    pub const fn new(sink: W, level: LevelFilter) -> Self {
        Self {
            sink: Mutex::new(sink),
            level,
        }
    }

    /// Most verbose level written.
    #[inline]
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Run `f` with exclusive access to the sink.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.sink.lock())
    }
}

impl<W: Write + Send + 'static> Console<W> {
    /// Register as the global logger. Fails if a logger is already set.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.level);
        Ok(())
    }
}

impl<W: Write + Send> Log for Console<W> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut sink = self.sink.lock();
        let _ = writeln!(sink, "[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Sink adapter that emits `\r\n` for every `\n`, as serial terminals expect.
pub struct Crlf<W>(pub W);

impl<W: Write> Write for Crlf<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut lines = s.split('\n');
        if let Some(first) = lines.next() {
            self.0.write_str(first)?;
        }
        for line in lines {
            self.0.write_str("\r\n")?;
            self.0.write_str(line)?;
        }
        Ok(())
    }
}
