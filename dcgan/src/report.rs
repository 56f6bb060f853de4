//! The JSON training log.
//!
//! The log file is a single JSON array that is rewritten every time a new
//! entry is appended:
//!
//! ```json
//! [
//!   { "epoch": 1, "iteration": 1000, "gen/loss": 1.92, "dis/loss": 0.71, "elapsed_time": 412.5 }
//! ]
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::updater::UpdateReport;
use crate::Result;

/// Name of the log file inside the output directory.
pub const LOG_FILE: &str = "log";

/// One line of the training log: the mean of every observation since the
/// previous entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: usize,
    pub iteration: usize,
    #[serde(rename = "gen/loss")]
    pub gen_loss: f64,
    #[serde(rename = "dis/loss")]
    pub dis_loss: f64,
    /// Seconds since the report was created.
    pub elapsed_time: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// When [LogReport] turns its observations into an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every `n` iterations.
    Iteration(NonZeroUsize),
    /// At the end of every epoch.
    Epoch,
}

impl From<Option<NonZeroUsize>> for Trigger {
    fn from(interval: Option<NonZeroUsize>) -> Self {
        interval.map_or(Trigger::Epoch, Trigger::Iteration)
    }
}

impl TryFrom<Option<usize>> for Trigger {
    type Error = crate::Error;

    /// `None` means once per epoch. `Some(0)` is rejected.
    fn try_from(interval: Option<usize>) -> Result<Self> {
        match interval {
            None => Ok(Trigger::Epoch),
            Some(n) => NonZeroUsize::new(n)
                .map(Trigger::Iteration)
                .ok_or_else(|| crate::Error::Config("log interval must be positive".into())),
        }
    }
}

/// Accumulates losses and periodically writes their means to `<out>/log`.
#[derive(Debug)]
pub struct LogReport {
    path: PathBuf,
    trigger: Trigger,
    entries: Vec<LogEntry>,
    gen_sum: f64,
    dis_sum: f64,
    count: usize,
    start: Instant,
}

impl LogReport {
    pub fn new<P: AsRef<Path>>(out_dir: P, trigger: Trigger) -> Self {
        Self {
            path: out_dir.as_ref().join(LOG_FILE),
            trigger,
            entries: Vec::new(),
            gen_sum: 0.0,
            dis_sum: 0.0,
            count: 0,
            start: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn observe(&mut self, report: &UpdateReport) {
        self.gen_sum += report.gen_loss;
        self.dis_sum += report.dis_loss;
        self.count += 1;
    }

    /// Call after every update. Writes an entry when an iteration trigger fires.
    pub fn on_iteration(&mut self, epoch: usize, iteration: usize) -> Result<Option<&LogEntry>> {
        match self.trigger {
            Trigger::Iteration(n) if iteration % n.get() == 0 => self.flush(epoch, iteration),
            _ => Ok(None),
        }
    }

    /// Call after every epoch. Writes an entry when the trigger is [Trigger::Epoch].
    pub fn on_epoch_end(&mut self, epoch: usize, iteration: usize) -> Result<Option<&LogEntry>> {
        match self.trigger {
            Trigger::Epoch => self.flush(epoch, iteration),
            Trigger::Iteration(_) => Ok(None),
        }
    }

    /// Appends the mean of the pending observations and rewrites the log file.
    /// Does nothing when nothing was observed since the last entry.
    pub fn flush(&mut self, epoch: usize, iteration: usize) -> Result<Option<&LogEntry>> {
        if self.count == 0 {
            return Ok(None);
        }
        let n = self.count as f64;
        self.entries.push(LogEntry {
            epoch,
            iteration,
            gen_loss: self.gen_sum / n,
            dis_loss: self.dis_sum / n,
            elapsed_time: self.start.elapsed().as_secs_f64(),
            extra: BTreeMap::new(),
        });
        self.gen_sum = 0.0;
        self.dis_sum = 0.0;
        self.count = 0;
        self.write()?;
        Ok(self.entries.last())
    }

    fn write(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        let file = std::fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &self.entries)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
