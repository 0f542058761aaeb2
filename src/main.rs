use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use print_notify::camera::HttpSnapshotCamera;
use print_notify::config::{Config, SourceSpec};
use print_notify::messages::{MessageTemplates, Render};
use print_notify::queue::{FrameSource, notification_queue};
use print_notify::{
    AlertService, FrameCache, HttpStatusSource, HttpWebhookClient, JobStateMachine,
    JsonLinesSource, Monitor, PrintLogWriter, StatusNormalizer, StatusRecord, StatusSource, Worker,
};

/// How long shutdown waits for the status source to notice the flag.
const SOURCE_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Print Notify - webhook notifications for 3D printer jobs.
///
/// Reads the printer's status stream, detects print start, pause, resume,
/// finish, failure and progress milestones, and posts a message for each to
/// every configured webhook, optionally with a camera snapshot.
///
/// # Environment Variables
///
/// Required:
/// * `STATUS_SOURCE` - `-` for stdin, a JSON-lines file, or an http(s) status URL
/// * `WEBHOOK` - Webhook URL (add `WEBHOOK_2`, `WEBHOOK_3`, ... for more)
///
/// Optional (with defaults):
/// * `MESSAGES_FILE` - JSON object of per-event message templates
/// * `REPORT_START`, `REPORT_PAUSE`, `REPORT_RESUME`, `REPORT_FINISH`,
///   `REPORT_FAILURE`, `REPORT_FIRST_LAYER`, `REPORT_SECOND_LAYER` (default "Y")
/// * `REPORT_PERCENTAGES` - Comma-separated progress thresholds
/// * `REPORT_25_PERC`, `REPORT_50_PERC`, `REPORT_75_PERC`,
///   `REPORT_EVERY_5_PERC`, `REPORT_EVERY_10_PERC` (default "N")
/// * `PERCENT_MODE` - `layer` or `time` (default "layer")
/// * `CAMERA_URL` - Snapshot URL to attach frames from
/// * `PRINT_LOG_ENABLED` - Write per-job JSON-lines logs (default "N")
///
/// # Usage
///
/// ```bash
/// export STATUS_SOURCE="http://bridge.local:8080/status"
/// export WEBHOOK="https://discord.com/api/webhooks/..."
/// export CAMERA_URL="http://bridge.local:8080/snapshot.jpg"
/// ./print-notify
/// ```
fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = Config::load().context(
        "Failed to load configuration. Please ensure all required environment variables are set.",
    )?;

    info!("Print Notify starting...");
    info!("Delivering to {} webhook(s)", config.webhook_urls.len());
    info!("Progress thresholds: {:?}", config.report.percentages);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let renderer: Box<dyn Render> = match &config.messages_file {
        Some(path) => Box::new(MessageTemplates::load(path)?),
        None => Box::new(MessageTemplates::default()),
    };

    let alert_service = AlertService::new(
        config.webhook_urls.clone(),
        Box::new(HttpWebhookClient::new(config.http_timeout)?),
        config.webhook_delay,
    );

    let frames = config.camera.as_ref().map(|camera| {
        info!("Camera attachments enabled from {}", camera.url);
        FrameSource {
            cache: FrameCache::new(
                Arc::new(HttpSnapshotCamera::new(
                    camera.url.clone(),
                    camera.poll_interval,
                    config.http_timeout,
                )),
                camera.idle_timeout,
            ),
            max_wait: camera.frame_wait,
        }
    });

    let (queue, rx) = notification_queue();
    let worker = Worker::new(
        rx,
        renderer,
        alert_service,
        frames.clone(),
        Arc::clone(&shutdown),
    )
    .spawn()?;

    let print_log = config.print_log.clone().map(|log_config| {
        info!("Print logs will be written to {}", log_config.directory.display());
        PrintLogWriter::new(log_config)
    });

    let monitor = Arc::new(Mutex::new(Monitor::new(
        StatusNormalizer::new(config.percent_mode),
        JobStateMachine::new(config.report.clone()),
        print_log,
        queue,
    )));

    let mut source: Box<dyn StatusSource> = match &config.source {
        SourceSpec::Stdin => Box::new(JsonLinesSource::stdin()),
        SourceSpec::File(path) => Box::new(JsonLinesSource::file(path.clone())),
        SourceSpec::Http { url, interval } => Box::new(HttpStatusSource::new(
            url.clone(),
            *interval,
            config.http_timeout,
        )),
    };
    source.connect()?;
    source.request_full_status()?;

    let source_thread = {
        let monitor = Arc::clone(&monitor);
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("status-source".to_string())
            .spawn(move || {
                let mut on_status = |record: StatusRecord| {
                    monitor
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .handle_status(record);
                };
                let result = source.run(&mut on_status, &shutdown);
                source.disconnect();
                result
            })?
    };

    info!("Print Notify initialized successfully. Watching printer status...");

    while !shutdown.load(Ordering::SeqCst) && !source_thread.is_finished() {
        thread::sleep(Duration::from_millis(200));
    }

    let interrupted = shutdown.load(Ordering::SeqCst);
    if interrupted {
        info!("Shutdown requested");
    } else {
        info!("Status stream ended, delivering queued notifications");
    }

    // Closing the monitor closes the queue, so the worker drains and exits.
    monitor.lock().unwrap_or_else(|e| e.into_inner()).close();

    if worker.join().is_err() {
        warn!("Notification worker panicked");
    }

    if let Some(frames) = &frames {
        frames.cache.stop();
    }

    finish_source(source_thread, Instant::now() + SOURCE_GRACE_PERIOD);

    info!("Print Notify stopped.");
    Ok(())
}

/// Join the source thread if it finishes before `deadline`.
fn finish_source(handle: thread::JoinHandle<Result<()>>, deadline: Instant) {
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
    if !handle.is_finished() {
        warn!("Status source did not stop in time");
        return;
    }
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Status source stopped with error: {:#}", e),
        Err(_) => warn!("Status source thread panicked"),
    }
}
