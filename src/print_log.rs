use log::{debug, error, info};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::PrintLogConfig;
use crate::error::PrintLogError;
use crate::status::{GcodeState, NormalizedStatus, StatusRecord};

struct OpenLog {
    path: PathBuf,
    writer: BufWriter<File>,
    last_write: Instant,
}

enum LogState {
    Idle,
    Logging(OpenLog),
    /// Opening or writing failed; stays off until the job ends.
    Disabled,
}

/// Persists a filtered, rate-limited history of each print job.
///
/// A file is opened when the printer starts running, one JSON line is
/// appended at most once per interval while it runs, and a final line is
/// written when the job finishes or fails. I/O problems switch logging off
/// for the rest of the job and never reach the caller.
pub struct PrintLogWriter {
    config: PrintLogConfig,
    state: LogState,
}

impl PrintLogWriter {
    pub fn new(config: PrintLogConfig) -> Self {
        Self {
            config,
            state: LogState::Idle,
        }
    }

    pub fn is_logging(&self) -> bool {
        matches!(self.state, LogState::Logging(_))
    }

    /// Path of the log currently being written.
    pub fn current_path(&self) -> Option<&Path> {
        match &self.state {
            LogState::Logging(log) => Some(&log.path),
            _ => None,
        }
    }

    pub fn observe(&mut self, status: &NormalizedStatus) {
        self.observe_at(status, Instant::now());
    }

    /// Feed one status observed at `now`.
    pub fn observe_at(&mut self, status: &NormalizedStatus, now: Instant) {
        let gcode_state = status.state();
        let job_ended = matches!(gcode_state, GcodeState::Finish | GcodeState::Failed);

        match &mut self.state {
            LogState::Idle if gcode_state == GcodeState::Running => {
                match open_log(&self.config, &status.record, now) {
                    Ok(log) => {
                        info!("Print log opened at {}", log.path.display());
                        self.state = LogState::Logging(log);
                        self.write(&status.record, now);
                    }
                    Err(e) => {
                        error!("{}; print logging disabled for this job", e);
                        self.state = LogState::Disabled;
                    }
                }
            }
            LogState::Logging(_) if job_ended => {
                self.write(&status.record, now);
                self.close();
            }
            LogState::Logging(log) if gcode_state == GcodeState::Running => {
                if now.duration_since(log.last_write) >= self.config.interval {
                    self.write(&status.record, now);
                }
            }
            LogState::Disabled if job_ended => self.state = LogState::Idle,
            _ => {}
        }
    }

    /// Flush and close the current log, if any.
    pub fn close(&mut self) {
        if let LogState::Logging(mut log) = std::mem::replace(&mut self.state, LogState::Idle) {
            if let Err(e) = log.writer.flush() {
                error!("Failed to flush print log {}: {}", log.path.display(), e);
            }
            info!("Print log closed at {}", log.path.display());
        }
    }

    fn write(&mut self, record: &StatusRecord, now: Instant) {
        let LogState::Logging(log) = &mut self.state else {
            return;
        };

        match write_entry(log, record, &self.config.excluded_keys) {
            Ok(()) => {
                log.last_write = now;
                debug!("Print log entry written");
            }
            Err(e) => {
                error!("{}; print logging disabled for this job", e);
                self.state = LogState::Disabled;
            }
        }
    }
}

fn open_log(
    config: &PrintLogConfig,
    record: &StatusRecord,
    now: Instant,
) -> Result<OpenLog, PrintLogError> {
    let path = config.directory.join(log_file_name(record));
    let open_error = |e: std::io::Error| PrintLogError::OpenFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    fs::create_dir_all(&config.directory).map_err(open_error)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(open_error)?;

    Ok(OpenLog {
        writer: BufWriter::new(file),
        path,
        last_write: now,
    })
}

fn write_entry(
    log: &mut OpenLog,
    record: &StatusRecord,
    excluded_keys: &[String],
) -> Result<(), PrintLogError> {
    let write_error = |reason: String| PrintLogError::WriteFailed {
        path: log.path.display().to_string(),
        reason,
    };

    let line = serde_json::to_string(&filtered_entry(record, excluded_keys))
        .map_err(|e| write_error(e.to_string()))?;
    writeln!(log.writer, "{}", line)
        .and_then(|()| log.writer.flush())
        .map_err(|e| write_error(e.to_string()))
}

/// The record as a JSON object without the excluded top-level keys.
pub fn filtered_entry(record: &StatusRecord, excluded_keys: &[String]) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        for key in excluded_keys {
            map.remove(key);
        }
    }
    value
}

/// `print_<date>_<project_id>_<task_id>_<subtask_id>.log`
pub fn log_file_name(record: &StatusRecord) -> String {
    let date = chrono::Local::now().format("%Y-%m-%d");
    format!(
        "print_{}_{}_{}_{}.log",
        date,
        file_safe(record.project_id.as_deref()),
        file_safe(record.task_id.as_deref()),
        file_safe(record.subtask_id.as_deref()),
    )
}

fn file_safe(id: Option<&str>) -> String {
    match id {
        Some(id) if !id.is_empty() => id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect(),
        _ => "0".to_string(),
    }
}
