use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::job_state::ReportSettings;
use crate::status::PercentMode;

/// Where status records come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    /// Read JSON lines from standard input.
    Stdin,
    /// Replay JSON lines from a file.
    File(PathBuf),
    /// Poll an HTTP endpoint returning the current status.
    Http { url: String, interval: Duration },
}

/// Camera attachment settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Snapshot URL polled while the stream is active.
    pub url: String,
    /// Longest time the worker waits for a frame.
    pub frame_wait: Duration,
    /// Quiet period after a stop request before the stream really stops.
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
}

/// Print log settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintLogConfig {
    pub directory: PathBuf,
    pub interval: Duration,
    /// Keys removed from every entry before it is written.
    pub excluded_keys: Vec<String>,
}

/// Configuration for the notifier loaded from environment variables.
///
/// All values come from the environment to support containerized
/// deployments. Flags accept `Y`/`N`, `true`/`false` or `1`/`0`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Status record source.
    /// Environment variable: `STATUS_SOURCE` (`-`, a file path, or an http(s) URL)
    pub source: SourceSpec,

    /// Webhook URLs in delivery order.
    /// Environment variables: `WEBHOOK`, `WEBHOOK_2`, `WEBHOOK_3`, ...
    pub webhook_urls: Vec<String>,

    /// Optional JSON file mapping event names to message templates.
    /// Environment variable: `MESSAGES_FILE`
    pub messages_file: Option<PathBuf>,

    /// Which events are reported.
    pub report: ReportSettings,

    /// Environment variable: `PERCENT_MODE` (`layer` or `time`, default `layer`)
    pub percent_mode: PercentMode,

    /// Camera attachment, `None` when disabled.
    /// Environment variables: `CAMERA_URL`, `CAMERA_ENABLED`,
    /// `CAMERA_WAIT_SECONDS`, `CAMERA_IDLE_SECONDS`, `CAMERA_POLL_SECONDS`
    pub camera: Option<CameraConfig>,

    /// Delay between consecutive webhook posts.
    /// Environment variable: `WEBHOOK_DELAY_SECONDS`
    pub webhook_delay: Duration,

    /// Environment variable: `HTTP_TIMEOUT_SECONDS`
    pub http_timeout: Duration,

    /// Print log, `None` when disabled.
    /// Environment variables: `PRINT_LOG_ENABLED`, `PRINT_LOG_DIR`,
    /// `PRINT_LOG_INTERVAL_SECONDS`, `PRINT_LOG_EXCLUDE`
    pub print_log: Option<PrintLogConfig>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value
    /// cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let source = parse_source(
            &env.required("STATUS_SOURCE")?,
            env.seconds("STATUS_POLL_SECONDS", 2)?,
        );

        let mut webhook_urls = vec![env.required("WEBHOOK")?];
        for i in 2.. {
            match env.get(&format!("WEBHOOK_{}", i)) {
                Some(url) => webhook_urls.push(url),
                None => break,
            }
        }

        let messages_file = env.get("MESSAGES_FILE").map(PathBuf::from);

        let report = ReportSettings {
            start: env.flag("REPORT_START", true)?,
            pause: env.flag("REPORT_PAUSE", true)?,
            resume: env.flag("REPORT_RESUME", true)?,
            finish: env.flag("REPORT_FINISH", true)?,
            failure: env.flag("REPORT_FAILURE", true)?,
            first_layer: env.flag("REPORT_FIRST_LAYER", true)?,
            second_layer: env.flag("REPORT_SECOND_LAYER", true)?,
            percentages: percentage_thresholds(&env)?,
        };

        let percent_mode = match env.get("PERCENT_MODE").as_deref() {
            None | Some("layer") => PercentMode::Layer,
            Some("time") => PercentMode::Time,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "PERCENT_MODE".to_string(),
                    value: other.to_string(),
                    reason: "must be 'layer' or 'time'".to_string(),
                });
            }
        };

        let camera_enabled = env.flag("CAMERA_ENABLED", true)?;
        let camera = match env.get("CAMERA_URL") {
            Some(url) if camera_enabled => Some(CameraConfig {
                url,
                frame_wait: env.seconds("CAMERA_WAIT_SECONDS", 10)?,
                idle_timeout: env.seconds("CAMERA_IDLE_SECONDS", 30)?,
                poll_interval: env.seconds("CAMERA_POLL_SECONDS", 1)?,
            }),
            _ => None,
        };

        let print_log = if env.flag("PRINT_LOG_ENABLED", false)? {
            let mut excluded_keys: Vec<String> = constants::DEFAULT_EXCLUDED_LOG_KEYS
                .iter()
                .map(|k| k.to_string())
                .collect();
            excluded_keys.extend(env.list("PRINT_LOG_EXCLUDE"));
            Some(PrintLogConfig {
                directory: PathBuf::from(
                    env.get("PRINT_LOG_DIR")
                        .unwrap_or_else(|| "./print_logs".to_string()),
                ),
                interval: env.seconds("PRINT_LOG_INTERVAL_SECONDS", 60)?,
                excluded_keys,
            })
        } else {
            None
        };

        Ok(Config {
            source,
            webhook_urls,
            messages_file,
            report,
            percent_mode,
            camera,
            webhook_delay: env.seconds("WEBHOOK_DELAY_SECONDS", 2)?,
            http_timeout: env.seconds("HTTP_TIMEOUT_SECONDS", 30)?,
            print_log,
        })
    }
}

fn parse_source(value: &str, interval: Duration) -> SourceSpec {
    if value == "-" {
        SourceSpec::Stdin
    } else if value.starts_with("http://") || value.starts_with("https://") {
        SourceSpec::Http {
            url: value.to_string(),
            interval,
        }
    } else {
        SourceSpec::File(PathBuf::from(value))
    }
}

/// Union of every configured threshold source, sorted and de-duplicated.
fn percentage_thresholds<F>(env: &Env<F>) -> Result<Vec<u8>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut thresholds = Vec::new();

    for item in env.list("REPORT_PERCENTAGES") {
        let value = item
            .parse::<u8>()
            .ok()
            .filter(|v| *v <= 100)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "REPORT_PERCENTAGES".to_string(),
                value: item.clone(),
                reason: "thresholds must be whole numbers between 0 and 100".to_string(),
            })?;
        thresholds.push(value);
    }

    for (key, value) in [
        ("REPORT_25_PERC", 25),
        ("REPORT_50_PERC", 50),
        ("REPORT_75_PERC", 75),
    ] {
        if env.flag(key, false)? {
            thresholds.push(value);
        }
    }

    if env.flag("REPORT_EVERY_5_PERC", false)? {
        thresholds.extend((5..=100).step_by(5));
    }
    if env.flag("REPORT_EVERY_10_PERC", false)? {
        thresholds.extend((10..=100).step_by(10));
    }

    thresholds.sort_unstable();
    thresholds.dedup();
    Ok(thresholds)
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value of `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingEnvVar {
            var_name: key.to_string(),
        })
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" | "1" => Ok(true),
                "n" | "no" | "false" | "0" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    field: key.to_string(),
                    value,
                    reason: "must be 'Y' or 'N'".to_string(),
                }),
            },
        }
    }

    fn seconds(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        match self.get(key) {
            None => Ok(Duration::from_secs(default)),
            Some(value) => value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::InvalidValue {
                    field: key.to_string(),
                    value,
                    reason: e.to_string(),
                }),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Application constants used throughout the system.
pub mod constants {
    use std::time::Duration;

    /// How long the worker blocks on the queue before checking for shutdown.
    pub const QUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

    /// Resolution of the frame wait loop.
    pub const FRAME_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Stand-in for the stage code when a status carries none.
    pub const MISSING_STAGE_TEXT: &str = "none";

    /// High-volume keys never written to the print log.
    pub const DEFAULT_EXCLUDED_LOG_KEYS: &[&str] = &[
        "ams",
        "vt_tray",
        "lights_report",
        "ipcam",
        "xcam",
        "upgrade_state",
        "upload",
    ];

    /// Model file extensions dropped from print names.
    pub const MODEL_EXTENSIONS: &[&str] = &["stl", "3mf", "step"];

    /// File name of the camera frame attached to webhook posts.
    pub const ATTACHMENT_NAME: &str = "camera.jpg";
}
