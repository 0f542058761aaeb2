use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::alerts::{AlertService, DeliveryOutcome};
use crate::config::constants;
use crate::error::NotifyError;
use crate::frame_cache::{CameraFrame, FrameCache};
use crate::job_state::NotificationEvent;
use crate::messages::Render;

/// Create a connected producer and worker input.
pub fn notification_queue() -> (NotificationQueue, Receiver<NotificationEvent>) {
    let (tx, rx) = unbounded();
    (NotificationQueue { tx }, rx)
}

/// Producer side of the unbounded notification queue. Never blocks.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: Sender<NotificationEvent>,
}

impl NotificationQueue {
    /// Enqueue an event. Returns `false` if the worker has gone away.
    pub fn push(&self, event: NotificationEvent) -> bool {
        let kind = event.kind;
        match self.tx.send(event) {
            Ok(()) => {
                info!("Queued {} event", kind);
                true
            }
            Err(_) => {
                warn!("Notification worker is gone, dropping {} event", kind);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Camera attachment settings for the worker.
#[derive(Clone)]
pub struct FrameSource {
    pub cache: FrameCache,
    pub max_wait: Duration,
}

/// Single consumer of the notification queue.
///
/// Owns all slow work: waiting for a camera frame, rendering the message
/// and posting it to every webhook. Exits when the shutdown flag is set or
/// the queue is closed and drained.
pub struct Worker {
    rx: Receiver<NotificationEvent>,
    renderer: Box<dyn Render>,
    alerts: AlertService,
    frames: Option<FrameSource>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        rx: Receiver<NotificationEvent>,
        renderer: Box<dyn Render>,
        alerts: AlertService,
        frames: Option<FrameSource>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rx,
            renderer,
            alerts,
            frames,
            shutdown,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("notify-worker".to_string())
            .spawn(move || self.run())
    }

    pub fn run(self) {
        info!(
            "Notification worker started with {} webhook(s)",
            self.alerts.webhook_count()
        );

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, notification worker exiting");
                break;
            }

            match self.rx.recv_timeout(constants::QUEUE_POLL_TIMEOUT) {
                Ok(event) => {
                    if let Err(e) = self.handle(&event) {
                        error!("Skipping {} event: {}", event.kind, e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Notification queue closed, worker exiting");
                    break;
                }
            }
        }
    }

    /// Deliver one event to every webhook.
    ///
    /// # Errors
    ///
    /// Returns an error when the message cannot be rendered, in which case
    /// nothing is posted. Per-webhook failures are reported in the outcomes.
    pub fn handle(&self, event: &NotificationEvent) -> Result<Vec<DeliveryOutcome>, NotifyError> {
        info!("Delivering {} event", event.kind);

        let frame = match &self.frames {
            Some(frames) => frames.cache.get_frame(frames.max_wait),
            None => CameraFrame::default(),
        };

        let rendered = self.renderer.render(event.kind, &event.status);

        let outcomes = match rendered {
            Ok(content) => Ok(self.alerts.deliver(&content, &frame)),
            Err(e) => Err(NotifyError::from(e)),
        };

        if event.kind.ends_job() {
            if let Some(frames) = &self.frames {
                frames.cache.stop_when_idle();
            }
        }

        outcomes
    }
}
