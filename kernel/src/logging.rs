//! Kernel logging facility
//!
//! Routes the `log` facade to a console sink supplied by the caller. The
//! console driver itself lives outside this crate.
//! Log levels are configured based on build configuration (debug/release).

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Where formatted log lines end up (usually the serial console)
pub type LogSink = fn(fmt::Arguments);

/// Global logger instance available throughout the kernel
pub static LOGGER: Logger = Logger::new();

/// Logger that serialises output through a lock so lines never interleave
pub struct Logger {
    sink: Mutex<Option<LogSink>>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a logger with no sink attached; records are dropped until
    /// [`Logger::attach`] is called
    pub const fn new() -> Logger {
        Logger {
            sink: Mutex::new(None),
        }
    }

    pub fn attach(&self, sink: LogSink) {
        *self.sink.lock() = Some(sink);
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats messages as "[LEVEL] message"
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = self.sink.lock();
        if let Some(write) = *sink {
            write(format_args!("[{}] {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Installs [`LOGGER`] as the global logger, writing to `sink`
///
/// # Notes
/// * Sets different log levels for debug/release builds:
///   - Debug builds: LevelFilter::Debug
///   - Release builds: LevelFilter::Info
pub fn init(sink: LogSink) {
    LOGGER.attach(sink);
    log::set_logger(&LOGGER)
        .map(|()| {
            log::set_max_level(
                #[cfg(debug_assertions)]
                LevelFilter::Debug,
                #[cfg(not(debug_assertions))]
                LevelFilter::Info,
            )
        })
        .expect("Logger initialization failed");
}
