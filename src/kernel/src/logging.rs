//! Kernel logger for the `log` facade.
//!
//! Records go to a sink function registered at boot, normally the serial
//! port. Format: `[LEVEL] target: message`.

use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Once;

/// Destination of formatted log lines.
pub type Sink = fn(fmt::Arguments<'_>);

/// `log` backend writing to a [`Sink`].
pub struct KernelLogger {
    sink: Once<Sink>,
}

static LOGGER: KernelLogger = KernelLogger { sink: Once::new() };

/// Installs the kernel logger.
///
/// Fails if another logger was installed first.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            sink(format_args!(
                "[{:<5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}
