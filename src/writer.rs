//! Log file sink that rolls over by calendar day and by line count.
//!
//! Files live in one directory and are named after the day they cover:
//!
//! ```text
//! log/2024_01_15.log      first `max_lines` lines of the day
//! log/2024_01_15-1.log    next `max_lines` lines
//! log/2024_01_16.log      new day, numbering starts over
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use time::Date;

/// Builds `{dir}/{YYYY_MM_DD}{suffix}`, or `{dir}/{YYYY_MM_DD}-{seq}{suffix}`
/// for every file of the day after the first.
pub(crate) fn file_path(dir: &Path, suffix: &str, date: Date, seq: usize) -> PathBuf {
    let stem = format!(
        "{:04}_{:02}_{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    );
    let name = match seq {
        0 => format!("{stem}{suffix}"),
        n => format!("{stem}-{n}{suffix}"),
    };
    dir.join(name)
}

pub(crate) struct RollingFile {
    dir: PathBuf,
    suffix: String,
    max_lines: usize,
    /// Day covered by the open file.
    today: Date,
    /// Index of the open file within `today`.
    seq: usize,
    /// Lines written to the open file.
    lines: usize,
    /// `None` after a failed rollover; reopened on the next write.
    file: Option<BufWriter<File>>,
}

impl RollingFile {
    /// Creates `dir` if needed and opens the first file of `today`.
    pub(crate) fn open(
        dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
        max_lines: usize,
        today: Date,
    ) -> io::Result<Self> {
        assert!(max_lines > 0, "max lines per file must be greater than zero");
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut roller = Self {
            dir,
            suffix: suffix.into(),
            max_lines,
            today,
            seq: 0,
            lines: 0,
            file: None,
        };
        roller.reopen()?;
        Ok(roller)
    }

    /// Writes one formatted line, first rolling over if `date` starts a new
    /// day or the open file already holds `max_lines` lines.
    ///
    /// Days only move forward: a line stamped before the current day goes
    /// into the current file.
    pub(crate) fn write_line(&mut self, date: Date, line: &[u8]) -> io::Result<()> {
        if date > self.today {
            self.today = date;
            self.seq = 0;
            self.roll()?;
        } else if self.lines >= self.max_lines {
            self.seq += 1;
            self.roll()?;
        } else if self.file.is_none() {
            self.reopen()?;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line)?;
            self.lines += 1;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    /// Path of the file currently being written.
    pub(crate) fn current_path(&self) -> PathBuf {
        file_path(&self.dir, &self.suffix, self.today, self.seq)
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut old) = self.file.take() {
            old.flush()?;
        }
        self.lines = 0;
        self.reopen()
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.file = Some(BufWriter::new(file));
        Ok(())
    }
}

impl Drop for RollingFile {
    fn drop(&mut self) {
        self.flush().ok();
    }
}
