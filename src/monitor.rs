use log::{debug, info, warn};

use crate::job_state::{JobStateMachine, NotificationEvent};
use crate::print_log::PrintLogWriter;
use crate::queue::NotificationQueue;
use crate::status::{StatusNormalizer, StatusRecord};

/// The ingestion path: everything that runs for each incoming status.
///
/// Normalizes the record, lets the state machine decide on an event,
/// enqueues it for the worker and feeds the print log. None of this blocks,
/// so it is safe to call from the transport's callback.
pub struct Monitor {
    normalizer: StatusNormalizer,
    machine: JobStateMachine,
    print_log: Option<PrintLogWriter>,
    queue: Option<NotificationQueue>,
}

impl Monitor {
    pub fn new(
        normalizer: StatusNormalizer,
        machine: JobStateMachine,
        print_log: Option<PrintLogWriter>,
        queue: NotificationQueue,
    ) -> Self {
        Self {
            normalizer,
            machine,
            print_log,
            queue: Some(queue),
        }
    }

    /// Process one status record. Returns the event that was queued, if any.
    pub fn handle_status(&mut self, record: StatusRecord) -> Option<NotificationEvent> {
        let status = self.normalizer.normalize(record);
        debug!(
            "Status {} layer {}/{} {}% stage '{}'",
            status.state(),
            status.record.layer(),
            status.record.total_layers(),
            status.percent,
            status.stage_name
        );

        if let Some(log) = self.print_log.as_mut() {
            log.observe(&status);
        }

        let event = self.machine.process(&status)?;
        match &self.queue {
            Some(queue) => {
                queue.push(event.clone());
            }
            None => warn!("Monitor is closed, dropping {} event", event.kind),
        }
        Some(event)
    }

    /// Re-arm priming, e.g. after the transport reconnects.
    pub fn reset(&mut self) {
        info!("Resetting job tracking state");
        self.machine.reset();
    }

    /// Close any open print log and the notification queue. Statuses that
    /// still arrive afterwards are neither logged nor queued.
    pub fn close(&mut self) {
        if let Some(mut log) = self.print_log.take() {
            log.close();
        }
        self.queue = None;
    }
}
