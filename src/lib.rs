//! Print Notify - webhook notifications for 3D printer jobs.
//!
//! This library watches the status stream of a 3D printer, decides exactly
//! once per condition when something worth telling a human happened, and
//! delivers a message (optionally with a camera frame) to one or more
//! webhooks.
//!
//! # Core Components
//!
//! * [`status`] - Status records and normalization of derived fields
//! * [`job_state`] - The job state machine that turns statuses into events
//! * [`queue`] - Notification queue and the single delivery worker
//! * [`alerts`] - Webhook delivery with per-webhook failure isolation
//! * [`frame_cache`] - Latest camera frame with lazy start and idle stop
//! * [`camera`] - HTTP snapshot camera stream
//! * [`messages`] - Message templates and formatting helpers
//! * [`print_log`] - Rate-limited per-job JSON-lines history
//! * [`printer`] - Status sources (JSON lines, HTTP polling)
//! * [`monitor`] - The ingestion path tying the above together
//! * [`config`] - Configuration from environment variables
//! * [`error`] - Error types
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use print_notify::*;
//!
//! let config = config::Config::load()?;
//! let (queue, rx) = queue::notification_queue();
//! let mut monitor = monitor::Monitor::new(
//!     status::StatusNormalizer::new(config.percent_mode),
//!     job_state::JobStateMachine::new(config.report.clone()),
//!     None,
//!     queue,
//! );
//!
//! // Feed every status record from the printer...
//! monitor.handle_status(record);
//! ```

pub mod alerts;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame_cache;
pub mod job_state;
pub mod messages;
pub mod monitor;
pub mod print_log;
pub mod printer;
pub mod queue;
pub mod status;

pub use alerts::{AlertService, HttpWebhookClient, WebhookClient};
pub use frame_cache::{CameraFrame, CameraStream, FrameCache};
pub use job_state::{EventKind, JobStateMachine, NotificationEvent, ReportSettings};
pub use monitor::Monitor;
pub use print_log::PrintLogWriter;
pub use printer::{HttpStatusSource, JsonLinesSource, StatusSource};
pub use queue::{NotificationQueue, Worker};
pub use status::{GcodeState, NormalizedStatus, StatusNormalizer, StatusRecord};
