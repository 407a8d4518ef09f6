//! Log output to stderr.

use core::fmt::Write;

use log::LevelFilter;
use spin::Once;

pub struct Console;

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger at the given verbosity.
    pub fn init(verbosity: u8) -> Result<&'static Self, log::SetLoggerError> {
        let console = DEFAULT.call_once(|| Console);
        console.install(level_for(verbosity))?;
        Ok(console)
    }

    pub fn install(&'static self, level: LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(level);
        Ok(())
    }
}

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = String::new();
        if write_log_entry_to(&mut line, record).is_ok() {
            eprint!("{}", line);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(
    writer: &mut impl core::fmt::Write,
    record: &log::Record,
) -> core::fmt::Result {
    #[cfg(debug_assertions)]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(debug_assertions))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
