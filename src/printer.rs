use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::status::StatusRecord;

/// A connection to the printer that yields status records.
///
/// Implementations deliver records through the `on_status` callback from
/// [`StatusSource::run`] until the stream ends or `shutdown` is set.
pub trait StatusSource: Send {
    /// Establish the connection.
    fn connect(&mut self) -> Result<()>;

    /// Ask the printer for a complete status report. Called once after each
    /// successful connect.
    fn request_full_status(&mut self) -> Result<()> {
        Ok(())
    }

    /// Deliver records until end of stream or shutdown.
    fn run(&mut self, on_status: &mut dyn FnMut(StatusRecord), shutdown: &AtomicBool) -> Result<()>;

    /// Tear the connection down.
    fn disconnect(&mut self) {}
}

/// Merges partial status reports into a complete record.
///
/// Printers push deltas that only carry the fields that changed, so each
/// report is layered over everything seen before. Reports may be bare
/// status objects or wrapped as `{"print": {...}}`.
#[derive(Debug, Default)]
pub struct StatusAccumulator {
    fields: Map<String, Value>,
}

impl StatusAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one report and return the resulting full record.
    ///
    /// # Errors
    ///
    /// Returns an error if the report is not a JSON object or the merged
    /// fields do not form a valid record; the accumulated state is left
    /// untouched in that case.
    pub fn apply(&mut self, report: Value) -> Result<StatusRecord> {
        let Value::Object(mut body) = report else {
            return Err(anyhow!("status report is not a JSON object"));
        };
        if let Some(Value::Object(print)) = body.remove("print") {
            body = print;
        }

        let mut merged = self.fields.clone();
        merged.extend(body);
        let record: StatusRecord = serde_json::from_value(Value::Object(merged.clone()))
            .context("status report has invalid fields")?;

        self.fields = merged;
        Ok(record)
    }
}

enum LineInput {
    Stdin,
    File(PathBuf),
}

/// Reads status reports as JSON lines from a file or standard input.
///
/// Print logs written by this program can be replayed through it.
pub struct JsonLinesSource {
    input: LineInput,
    reader: Option<Box<dyn BufRead + Send>>,
    accumulator: StatusAccumulator,
}

impl JsonLinesSource {
    pub fn stdin() -> Self {
        Self::with_input(LineInput::Stdin)
    }

    pub fn file(path: PathBuf) -> Self {
        Self::with_input(LineInput::File(path))
    }

    /// Source over an already open reader.
    pub fn from_reader(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            input: LineInput::Stdin,
            reader: Some(reader),
            accumulator: StatusAccumulator::new(),
        }
    }

    fn with_input(input: LineInput) -> Self {
        Self {
            input,
            reader: None,
            accumulator: StatusAccumulator::new(),
        }
    }
}

impl StatusSource for JsonLinesSource {
    fn connect(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        let reader: Box<dyn BufRead + Send> = match &self.input {
            LineInput::Stdin => {
                info!("Reading status reports from stdin");
                Box::new(BufReader::new(io::stdin()))
            }
            LineInput::File(path) => {
                info!("Replaying status reports from {}", path.display());
                let file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Box::new(BufReader::new(file))
            }
        };
        self.reader = Some(reader);
        Ok(())
    }

    fn run(&mut self, on_status: &mut dyn FnMut(StatusRecord), shutdown: &AtomicBool) -> Result<()> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("status source is not connected"))?;

        let mut line = String::new();
        let mut line_number = 0usize;
        while !shutdown.load(Ordering::SeqCst) {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                info!("End of status stream after {} line(s)", line_number);
                break;
            }
            line_number += 1;

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            let parsed = serde_json::from_str::<Value>(text)
                .map_err(anyhow::Error::from)
                .and_then(|report| self.accumulator.apply(report));
            match parsed {
                Ok(record) => on_status(record),
                Err(e) => warn!("Skipping status line {}: {:#}", line_number, e),
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.reader = None;
    }
}

/// Polls an HTTP endpoint that returns the current printer status.
pub struct HttpStatusSource {
    pub api_url: String,
    interval: Duration,
    timeout: Duration,
    client: Option<reqwest::blocking::Client>,
    accumulator: StatusAccumulator,
}

impl HttpStatusSource {
    /// Create a new source for the given status URL.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Endpoint answering GET with a JSON status report
    /// * `interval` - Delay between polls
    /// * `timeout` - Per-request timeout
    pub fn new(api_url: String, interval: Duration, timeout: Duration) -> Self {
        Self {
            api_url,
            interval,
            timeout,
            client: None,
            accumulator: StatusAccumulator::new(),
        }
    }

    /// Fetch and merge the current status.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The source is not connected
    /// - The HTTP request fails
    /// - The endpoint returns an error status
    /// - JSON parsing fails
    pub fn get_printer_status(&mut self) -> Result<StatusRecord> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("status source is not connected"))?;
        let response = client.get(&self.api_url).send()?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to get printer status: HTTP {}",
                response.status()
            ));
        }

        let report: Value = response.json()?;
        self.accumulator.apply(report)
    }
}

impl StatusSource for HttpStatusSource {
    fn connect(&mut self) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        self.client = Some(client);
        info!("Polling printer status from {}", self.api_url);
        Ok(())
    }

    fn run(&mut self, on_status: &mut dyn FnMut(StatusRecord), shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            match self.get_printer_status() {
                Ok(record) => on_status(record),
                Err(e) => warn!("Failed to get printer status: {}", e),
            }
            sleep_unless_shutdown(self.interval, shutdown);
        }
        debug!("Status polling stopped");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.client = None;
    }
}

/// Sleep for `duration`, waking early once `shutdown` is set.
fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(200)));
    }
}
