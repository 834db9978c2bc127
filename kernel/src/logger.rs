//! `log` crate backend: every record goes to the serial port, so kernel
//! diagnostics survive even when VGA output is scrolled past or absent
//! (e.g. under a headless QEMU run).

use log::{Level, Log, Metadata, Record};

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the global logger. Called once, early in `kernel_entry`, before
/// any `log::info!`/`log::warn!` call elsewhere in the kernel.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Info))
        .expect("logger already initialized");
}
