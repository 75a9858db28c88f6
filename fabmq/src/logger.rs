use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::Path;

use slog::Drain;

use fabmq_conf::logging::{Log, To};

use crate::Result;
pub use slog::Logger;

/// Routes the `log` facade into an async slog drain configured by `cfg`.
pub fn logger_init(cfg: &Log) -> Result<()> {
    let level = cfg.level.inner();
    let logger = config_logger(cfg.filename(), cfg.to, level)?;
    log::set_boxed_logger(Box::new(LoggerEx(logger)))?;
    if cfg.to.off() {
        log::set_max_level(log::LevelFilter::Off);
    } else {
        log::set_max_level(slog_log_to_level(level).to_level_filter());
    }
    Ok(())
}

struct LoggerEx(Logger);

impl log::Log for LoggerEx {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic { location, level, tag: target };

        self.0.log(&slog::Record::new(&s, args, slog::b!()))
    }

    fn flush(&self) {}
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn slog_log_to_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error | slog::Level::Critical => log::Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    let module = r.module_path_static().unwrap_or("<unknown>");
    let file = r.file_static().unwrap_or("<unknown>");
    let line = r.line().unwrap_or_default();

    slog::RecordLocation { file, line, column: 0, function: "", module }
}

fn timestamp_local(io: &mut dyn Write) -> io::Result<()> {
    write!(io, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
}

pub fn config_logger(filename: String, to: To, level: slog::Level) -> Result<Logger> {
    let decorator = slog_term::PlainDecorator::new(WriteFilter::new(&filename, to)?);
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(timestamp_local)
        .use_file_location()
        .build()
        .fuse();

    let drain = slog::LevelFilter::new(drain, level).fuse();

    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Ok(Logger::root(drain, slog::o!()))
}

struct WriteFilter {
    file: Option<File>,
    console: Option<Stdout>,
}

impl WriteFilter {
    fn new(filename: &str, to: To) -> Result<Self> {
        let file = if to.file() && !filename.is_empty() { Some(open_file(filename)?) } else { None };
        let console = if to.console() { Some(io::stdout()) } else { None };
        Ok(Self { file, console })
    }
}

impl Write for WriteFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(console) = self.console.as_mut() {
            console.write_all(buf)?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(console) = self.console.as_mut() {
            console.flush()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_file(filename: &str) -> Result<File> {
    if let Some(dir) = Path::new(filename).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("logger dir config error, dir: {:?}, {:?}", dir, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(filename)
        .map_err(|e| anyhow::Error::msg(format!("logger file config error, filename: {}, {:?}", filename, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(slog_log_to_level(log_to_slog_level(log::Level::Warn)), log::Level::Warn);
        assert_eq!(slog_log_to_level(slog::Level::Critical), log::Level::Error);
    }

    #[test]
    fn test_file_logger() {
        let dir = std::env::temp_dir().join(format!("fabmq-logger-{}", uuid::Uuid::new_v4().as_simple()));
        let filename = dir.join("fabmq.log").to_string_lossy().to_string();
        let logger = config_logger(filename.clone(), To::File, slog::Level::Info).unwrap();
        slog::info!(logger, "hello {}", "file");
        slog::debug!(logger, "filtered");
        drop(logger);
        std::thread::sleep(std::time::Duration::from_millis(200));
        let content = std::fs::read_to_string(&filename).unwrap();
        assert!(content.contains("hello file"));
        assert!(!content.contains("filtered"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
