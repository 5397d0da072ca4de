use std::{
    fmt,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex},
};
use tracing::Dispatch;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Verbosity levels, coarsest first. A level enables itself and every
/// coarser level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    pub fn enables(&self, level: LogLevel) -> bool {
        level <= *self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

/// Explicitly constructed logger handed to the sync service and the HTTP
/// layer. Owns its own dispatcher instead of installing a global one.
#[derive(Clone)]
pub struct SyncLogger {
    level: LogLevel,
    dispatch: Dispatch,
}

impl fmt::Debug for SyncLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLogger")
            .field("level", &self.level)
            .finish()
    }
}

impl SyncLogger {
    pub fn new(level: LogLevel, writer: BoxMakeWriter) -> Self {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(level.as_str()))
            .with_ansi(false)
            .with_writer(writer)
            .finish();
        Self {
            level,
            dispatch: Dispatch::new(subscriber),
        }
    }

    /// Logger that discards everything.
    pub fn silent() -> Self {
        Self {
            level: LogLevel::Error,
            dispatch: Dispatch::none(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level.enables(level)
    }

    /// Run `emit` against this logger's dispatcher when `level` is enabled.
    pub fn emit<F: FnOnce()>(&self, level: LogLevel, emit: F) {
        if self.enabled(level) {
            tracing::dispatcher::with_default(&self.dispatch, emit);
        }
    }
}

pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Build the service logger: stdout plus an optional append-only file under
/// `log_dir`.
pub fn init_logging(level: LogLevel, log_dir: &str) -> (SyncLogger, LogGuard) {
    let guard = match open_log_file(log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    (SyncLogger::new(level, make_writer), guard)
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join("permit-sync.log");
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}
