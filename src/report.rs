//! Timestamp-suffixed CSV session reports.
//!
//! Rows are buffered and flushed at the end of every measurement block so a
//! crash or interrupt loses at most the block in progress.

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;

pub fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

pub fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Quote a cell when it contains a separator, quote or newline.
pub fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub struct CsvReport {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: usize,
}

impl CsvReport {
    /// Create `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.csv`, creating `dir` if needed.
    pub fn create(dir: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut path = dir.join(format!("{}_{}.csv", prefix, ts_now_clean()));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{}_{}_{}.csv", prefix, ts_now_clean(), n));
            n += 1;
        }
        Self::create_at(path)
    }

    pub fn create_at(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)?;
        log::info!("[report] writing {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row<I>(&mut self, cells: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Display,
    {
        let line: Vec<String> = cells
            .into_iter()
            .map(|c| csv_cell(&c.to_string()))
            .collect();
        writeln!(self.writer, "{}", line.join(","))?;
        self.rows += 1;
        Ok(())
    }

    /// Title row preceded by an empty separator line.
    pub fn section(&mut self, title: &str) -> Result<()> {
        if self.rows > 0 {
            writeln!(self.writer)?;
        }
        self.row([title])
    }

    /// End of a measurement block.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        log::debug!("[report] flushed {} rows to {}", self.rows, self.path.display());
        Ok(())
    }

    /// Record why the session ended early, then flush.
    pub fn abort_marker(&mut self, reason: &str) -> Result<()> {
        self.section("ABORTED")?;
        self.row(["reason", reason])?;
        let now = ts_now();
        self.row(["time", now.as_str()])?;
        self.flush()
    }
}
