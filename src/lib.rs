//! Shared plumbing for threaded network servers.
//!
//! - [`Buffer`]: growable I/O buffer with scatter reads.
//! - [`BoundedQueue`]: blocking bounded deque with timed pops and close.
//! - [`AsyncLogger`]: leveled logger writing date-rolled files, directly or
//!   through a background writer thread. Plugs into the `log` facade.
//! - [`ResourcePool`]: fixed pool of pre-created resources behind a
//!   [`Semaphore`], lent out through a drop guard.
//!
//! # Logging setup
//!
//! ```rust, ignore
//! use log::LevelFilter;
//!
//! let _guard = serverkit::init(LevelFilter::Info, "./log", ".log", 1024)?;
//! log::info!("server starting");
//! // Dropping the guard writes out queued lines and stops the writer thread.
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use log::LevelFilter;
use once_cell::sync::OnceCell;

mod buffer;
mod logger;
mod pool;
mod queue;
mod semaphore;
mod writer;

pub use buffer::{Buffer, DEFAULT_INITIAL_SIZE};
pub use logger::{AsyncLogger, Clock, SystemClock};
pub use pool::{Manage, PoolConfig, PoolError, PooledResource, ResourcePool};
pub use queue::{BoundedQueue, PopError, PushError};
pub use semaphore::{AcquireError, Semaphore};

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_MAX_LINES: usize = 50_000;

static LOGGER: OnceCell<AsyncLogger> = OnceCell::new();

/// Shuts the installed logger down when dropped: queued lines are written,
/// the writer thread is joined, and later lines are written synchronously.
#[must_use = "dropping the guard immediately stops the background writer"]
pub struct LoggerGuard {
    logger: &'static AsyncLogger,
}

impl LoggerGuard {
    pub fn logger(&self) -> &'static AsyncLogger {
        self.logger
    }
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        self.logger.shutdown();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("logger already initialized")]
    AlreadyInitialized,
    #[error("{0}")]
    SetLoggerError(#[from] log::SetLoggerError),
}

/// Configures an [`AsyncLogger`].
///
/// | setting          | default  |
/// |------------------|----------|
/// | level            | `Info`   |
/// | path             | `./log`  |
/// | suffix           | `.log`   |
/// | queue capacity   | 1024     |
/// | lines per file   | 50 000   |
///
/// A queue capacity of zero selects sync mode: no writer thread, each line is
/// written by the thread that logs it.
pub struct LoggerBuilder {
    level: LevelFilter,
    path: PathBuf,
    suffix: String,
    queue_capacity: usize,
    max_lines: usize,
    clock: Arc<dyn Clock>,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            level: LevelFilter::Info,
            path: PathBuf::from("./log"),
            suffix: ".log".to_owned(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_lines: DEFAULT_MAX_LINES,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Directory holding the log files; created if missing.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Lines per file before rolling over to a numbered file of the same day.
    ///
    /// # Panics
    ///
    /// Panics if `max_lines` is zero.
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        assert!(max_lines > 0, "max lines per file must be greater than zero");
        self.max_lines = max_lines;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens today's log file and starts the writer thread if needed.
    pub fn try_build(self) -> Result<AsyncLogger, LogError> {
        let today = self.clock.now().date();
        let file = writer::RollingFile::open(self.path, self.suffix, self.max_lines, today)?;
        let logger = AsyncLogger::open(self.level, file, self.queue_capacity, self.clock)?;
        Ok(logger)
    }

    /// Like [`try_build`](Self::try_build), but a logger that cannot open its
    /// file comes back disabled instead of failing.
    pub fn build(self) -> AsyncLogger {
        let level = self.level;
        self.try_build().unwrap_or_else(|_| AsyncLogger::disabled(level))
    }

    /// Builds the logger, makes it the process-wide instance and registers it
    /// as the `log` backend.
    ///
    /// Open failures degrade to a disabled logger, as with
    /// [`build`](Self::build). Fails if a logger was already installed.
    pub fn install(self) -> Result<LoggerGuard, LogError> {
        let mut fresh = Some(self);
        let logger = LOGGER.get_or_init(|| match fresh.take() {
            Some(builder) => builder.build(),
            None => AsyncLogger::disabled(LevelFilter::Off),
        });
        if fresh.is_some() {
            return Err(LogError::AlreadyInitialized);
        }

        log::set_logger(logger)?;
        log::set_max_level(LevelFilter::Trace);
        Ok(LoggerGuard { logger })
    }
}

/// Installs the process-wide logger: minimum `level`, files in `path` ending
/// in `suffix`, async when `queue_capacity > 0`.
pub fn init(
    level: LevelFilter,
    path: impl Into<PathBuf>,
    suffix: impl Into<String>,
    queue_capacity: usize,
) -> Result<LoggerGuard, LogError> {
    LoggerBuilder::new()
        .with_level(level)
        .with_path(path)
        .with_suffix(suffix)
        .with_queue_capacity(queue_capacity)
        .install()
}

/// The logger installed by [`init`] or [`LoggerBuilder::install`].
pub fn logger() -> Option<&'static AsyncLogger> {
    LOGGER.get()
}
