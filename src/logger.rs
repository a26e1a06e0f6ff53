//! Rolling file logger with an optional background writer thread.
//!
//! # Architecture
//!
//! ```text
//! [Producer Threads] → [AsyncLogger] → [BoundedQueue] → [Appender] → [RollingFile]
//!       ↓                  ↓                ↓               ↓              ↓
//!   log macros      format into       blocks when     writer thread   dated files
//!                   shared Buffer     full            drains lines    on disk
//! ```
//!
//! In sync mode there is no queue and no thread: the producer writes the
//! formatted line to the file itself, under the file lock.
//!
//! # Log Format
//!
//! ```text
//! 2024-01-15 14:30:45.123456 [INFO ] my_app::net - accepted 10.0.0.7:52144
//! └─ UTC timestamp, μs        └─ level └─ target    └─ message
//! ```
//!
//! Lines written through [`AsyncLogger::write`] carry no target.

use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{Level, LevelFilter};
use parking_lot::Mutex;
use time::{Date, OffsetDateTime};

use crate::buffer::Buffer;
use crate::queue::BoundedQueue;
use crate::writer::RollingFile;

const TIMESTAMP_FMT: &[time::format_description::FormatItem<'static>] = time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
);

/// Initial size of the shared formatting buffer.
const LINE_BUFFER_SIZE: usize = 256;

/// Source of the current time, used for timestamps and for deciding when a
/// new day starts.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A formatted line together with the day it belongs to.
pub(crate) struct Line {
    date: Date,
    text: String,
}

pub(crate) enum Message {
    Line(Line),
    /// Sent by `shutdown` behind every pending line.
    Shutdown,
}

/// Background writer state for async mode.
struct Worker {
    queue: Arc<BoundedQueue<Message>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Where lines go once formatted.
struct Sink {
    file: Arc<Mutex<RollingFile>>,
    worker: Option<Worker>,
}

/// Leveled logger writing to date-rolled files.
///
/// Built with [`LoggerBuilder`](crate::LoggerBuilder). Usually installed once
/// as the process-wide `log` backend, so the standard macros reach it:
///
/// ```rust, ignore
/// let _guard = serverkit::LoggerBuilder::new()
///     .with_path("./log")
///     .with_queue_capacity(1024)
///     .install()?;
///
/// log::info!("listening on {}", addr);
/// ```
///
/// A logger whose file could not be opened reports `is_open() == false` and
/// ignores every write.
pub struct AsyncLogger {
    level: Mutex<LevelFilter>,
    /// Formatting scratch space shared by all producers.
    buf: Mutex<Buffer>,
    clock: Arc<dyn Clock>,
    sink: Option<Sink>,
}

impl AsyncLogger {
    /// Opens today's file and, when `queue_capacity > 0`, starts the writer
    /// thread.
    pub(crate) fn open(
        level: LevelFilter,
        file: RollingFile,
        queue_capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let file = Arc::new(Mutex::new(file));
        let worker = if queue_capacity > 0 {
            let queue = Arc::new(BoundedQueue::new(queue_capacity));
            let appender = Appender::new(queue.clone(), file.clone());
            let handle = std::thread::Builder::new()
                .name("serverkit-log".into())
                .spawn(move || appender.run())?;
            Some(Worker {
                queue,
                handle: Mutex::new(Some(handle)),
            })
        } else {
            None
        };

        Ok(Self {
            level: Mutex::new(level),
            buf: Mutex::new(Buffer::new(LINE_BUFFER_SIZE)),
            clock,
            sink: Some(Sink { file, worker }),
        })
    }

    /// A logger that drops everything.
    pub(crate) fn disabled(level: LevelFilter) -> Self {
        Self {
            level: Mutex::new(level),
            buf: Mutex::new(Buffer::new(0)),
            clock: Arc::new(SystemClock),
            sink: None,
        }
    }

    /// Whether a log file is open. Writes are no-ops otherwise.
    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Whether lines are handed to a background writer thread.
    pub fn is_async(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.worker.is_some())
    }

    pub fn level(&self) -> LevelFilter {
        *self.level.lock()
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.level.lock() = level;
    }

    /// Cheap check made before any formatting happens.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        self.is_open() && level <= self.level()
    }

    /// Formats and records one line at `level`.
    ///
    /// ```rust, ignore
    /// logger.write(Level::Warn, format_args!("slow client {}", peer));
    /// ```
    pub fn write(&self, level: Level, args: fmt::Arguments<'_>) {
        self.write_line(level, None, args);
    }

    fn write_line(&self, level: Level, target: Option<&str>, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let sink = match self.sink.as_ref() {
            Some(sink) => sink,
            None => return,
        };

        let now = self.clock.now();
        // Rendered before any lock is taken: a `Display` impl may log too.
        let message = match args.as_str() {
            Some(message) => Cow::Borrowed(message),
            None => Cow::Owned(args.to_string()),
        };
        let text = {
            let mut buf = self.buf.lock();
            now.format_into(&mut *buf, TIMESTAMP_FMT).ok();
            match target {
                Some(target) => writeln!(buf, " [{:<5}] {} - {}", level, target, message).ok(),
                None => writeln!(buf, " [{:<5}] {}", level, message).ok(),
            };
            buf.retrieve_all_to_string()
        };
        let line = Line {
            date: now.date(),
            text,
        };

        let line = match sink.worker.as_ref() {
            // Blocks while the queue is full.
            Some(worker) => match worker.queue.push_back(Message::Line(line)) {
                Ok(()) => return,
                // Shut down: fall through to a direct write.
                Err(rejected) => match rejected.into_inner() {
                    Message::Line(line) => line,
                    Message::Shutdown => return,
                },
            },
            None => line,
        };

        let mut file = sink.file.lock();
        file.write_line(line.date, line.text.as_bytes()).ok();
        file.flush().ok();
    }

    /// Pushes buffered output to disk.
    ///
    /// In async mode this also wakes the writer thread; lines still queued
    /// are not waited for.
    pub fn flush(&self) {
        if let Some(sink) = self.sink.as_ref() {
            if let Some(worker) = sink.worker.as_ref() {
                worker.queue.flush();
            }
            sink.file.lock().flush().ok();
        }
    }

    /// Writes out every queued line, stops the writer thread and closes the
    /// queue. Later writes go straight to the file. Idempotent.
    pub fn shutdown(&self) {
        let sink = match self.sink.as_ref() {
            Some(sink) => sink,
            None => return,
        };
        if let Some(worker) = sink.worker.as_ref() {
            if let Some(handle) = worker.handle.lock().take() {
                worker.queue.push_back(Message::Shutdown).ok();
                handle.join().ok();
                // Lines that raced in behind the marker.
                let mut file = sink.file.lock();
                for message in worker.queue.close_and_drain() {
                    if let Message::Line(line) = message {
                        file.write_line(line.date, line.text.as_bytes()).ok();
                    }
                }
            }
        }
        sink.file.lock().flush().ok();
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AsyncLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLogger")
            .field("level", &self.level())
            .field("open", &self.is_open())
            .field("async", &self.is_async())
            .finish()
    }
}

impl log::Log for AsyncLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        AsyncLogger::enabled(self, metadata.level())
    }

    fn log(&self, record: &log::Record) {
        self.write_line(record.level(), Some(record.target()), *record.args());
    }

    fn flush(&self) {
        AsyncLogger::flush(self);
    }
}

/// Consumer side of async mode, run on the dedicated writer thread.
pub(crate) struct Appender {
    queue: Arc<BoundedQueue<Message>>,
    file: Arc<Mutex<RollingFile>>,
}

impl Appender {
    pub(crate) fn new(queue: Arc<BoundedQueue<Message>>, file: Arc<Mutex<RollingFile>>) -> Self {
        Self { queue, file }
    }

    /// Drains lines until the shutdown marker arrives or the queue closes.
    ///
    /// The file is flushed whenever the queue runs dry, so bursts are
    /// written with one flush at the end.
    pub(crate) fn run(self) {
        while let Some(message) = self.queue.pop() {
            match message {
                Message::Line(line) => {
                    let mut file = self.file.lock();
                    file.write_line(line.date, line.text.as_bytes()).ok();
                    if self.queue.is_empty() {
                        file.flush().ok();
                    }
                }
                Message::Shutdown => break,
            }
        }
        self.file.lock().flush().ok();
    }
}
