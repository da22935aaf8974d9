use log::{LevelFilter, Metadata, Record};
use std::sync::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use chrono::Local;

/// Appends `YYYY-mm-dd HH:MM:SS [LEVEL] message` lines to a file.
pub struct FileLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl FileLogger {
    pub fn new(log_file: &Path, level: LevelFilter) -> std::io::Result<Self> {
        if let Some(parent) = log_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // A poisoned lock or failed write drops the line.
        if let Ok(mut file) = self.file.lock() {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(
                file,
                "{} [{}] {}",
                timestamp,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// File logging when `log_file` is given, otherwise `env_logger` on stderr
/// honouring `RUST_LOG`.
pub fn init(log_file: Option<&Path>, debug: bool) -> anyhow::Result<()> {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    match log_file {
        Some(path) => {
            let logger = FileLogger::new(path, level)?;
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(level);
        }
        None => {
            env_logger::Builder::new()
                .filter_level(level)
                .parse_default_env()
                .try_init()?;
        }
    }
    Ok(())
}
