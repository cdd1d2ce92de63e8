//! JSON-lines telemetry and run resumption.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::core::{Result, TrainError};
use crate::nn::CheckpointId;

/// Name of the learner's telemetry stream.
pub const LEARNER_LOG: &str = "learner";

/// Appends one JSON object per line to `<dir>/<name>.jsonl`.
///
/// Every record gets `time_rel` (seconds since the run started, counting
/// time before a resume) and `time_abs` (seconds since the Unix epoch).
#[derive(Debug)]
pub struct DataLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    start_time: SystemTime,
}

impl DataLogger {
    pub fn new(dir: impl AsRef<Path>, name: &str, start_time: SystemTime) -> Result<Self> {
        let path = log_path(dir.as_ref(), name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainError::io(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            start_time,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` and flush.
    pub fn write(&mut self, mut record: Map<String, Value>) -> Result<()> {
        let now = SystemTime::now();
        let rel = now
            .duration_since(self.start_time)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        let abs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        record.insert("time_rel".to_owned(), Value::from(rel));
        record.insert("time_abs".to_owned(), Value::from(abs));

        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| TrainError::io(&self.path, e))
    }
}

fn log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.jsonl"))
}

/// Where a run starts: fresh, or just after the last logged learner step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StartInfo {
    pub start_time: SystemTime,
    pub start_step: u64,
    pub model_checkpoint: CheckpointId,
    pub total_trajectories: u64,
}

impl StartInfo {
    /// A new run starting now from checkpoint 0.
    pub fn fresh() -> Self {
        Self {
            start_time: SystemTime::now(),
            start_step: 1,
            model_checkpoint: CheckpointId::Step(0),
            total_trajectories: 0,
        }
    }

    #[must_use]
    pub fn is_resume(&self) -> bool {
        self.start_step > 1
    }

    /// Recover from the last record of `<dir>/learner.jsonl`.
    ///
    /// The run continues at the step after the logged one from the most
    /// recent checkpoint, with its clock shifted back by the logged
    /// `time_rel`.
    pub fn from_learner_log(dir: impl AsRef<Path>) -> Result<Self> {
        let path = log_path(dir.as_ref(), LEARNER_LOG);
        let contents = fs::read_to_string(&path).map_err(|e| TrainError::io(&path, e))?;
        let corrupt = |reason: &str| TrainError::Corrupt {
            path: path.clone(),
            reason: reason.to_owned(),
        };

        let last = contents
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| corrupt("no learner records to resume from"))?;
        let record: Value = serde_json::from_str(last)?;

        let step = record["step"]
            .as_u64()
            .ok_or_else(|| corrupt("last record has no step"))?;
        let total_trajectories = record["total_trajectories"]
            .as_u64()
            .ok_or_else(|| corrupt("last record has no total_trajectories"))?;
        let time_rel = record["time_rel"]
            .as_f64()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| corrupt("last record has no time_rel"))?;

        let now = SystemTime::now();
        let start_time = now
            .checked_sub(Duration::from_secs_f64(time_rel))
            .unwrap_or(now);
        Ok(Self {
            start_time,
            start_step: step + 1,
            model_checkpoint: CheckpointId::MostRecent,
            total_trajectories,
        })
    }
}
