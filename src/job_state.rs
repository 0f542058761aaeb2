use log::{debug, info};
use std::collections::BTreeSet;
use std::fmt;

use crate::status::{GcodeState, NormalizedStatus};

/// The kinds of notification the state machine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PrintStart,
    PrintPause,
    PrintResume,
    PrintFinish,
    PrintFailure,
    ProgressReport,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::PrintStart,
        EventKind::PrintPause,
        EventKind::PrintResume,
        EventKind::PrintFinish,
        EventKind::PrintFailure,
        EventKind::ProgressReport,
    ];

    /// Name used for message template lookup and logging.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PrintStart => "print_start",
            EventKind::PrintPause => "print_pause",
            EventKind::PrintResume => "print_resume",
            EventKind::PrintFinish => "print_finish",
            EventKind::PrintFailure => "print_failure",
            EventKind::ProgressReport => "progress_report",
        }
    }

    /// Whether this event ends a print job.
    pub fn ends_job(&self) -> bool {
        matches!(self, EventKind::PrintFinish | EventKind::PrintFailure)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event paired with the status that triggered it.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub status: NormalizedStatus,
}

/// Which events are reported and at which progress percentages.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    pub start: bool,
    pub pause: bool,
    pub resume: bool,
    pub finish: bool,
    pub failure: bool,
    pub first_layer: bool,
    pub second_layer: bool,
    /// Sorted ascending, no duplicates, all within 0..=100.
    pub percentages: Vec<u8>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            start: true,
            pause: true,
            resume: true,
            finish: true,
            failure: true,
            first_layer: true,
            second_layer: true,
            percentages: Vec::new(),
        }
    }
}

/// Tracking state for the machine and the current job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTrackingState {
    /// Last observed machine state. Survives job boundaries.
    pub last_gcode_state: Option<GcodeState>,
    pub is_primed: bool,
    pub reported_first_layer: bool,
    pub reported_second_layer: bool,
    pub reported_percentages: BTreeSet<u8>,
}

impl JobTrackingState {
    fn reset_job(&mut self) {
        self.reported_first_layer = false;
        self.reported_second_layer = false;
        self.reported_percentages.clear();
    }

    fn mark_percentages_through(&mut self, percent: u8) {
        self.reported_percentages.extend(0..=percent.min(100));
    }
}

/// Turns the status stream into discrete notification events.
///
/// At most one event is produced per status. The first status ever seen
/// only primes the tracking state, so attaching to a print that is already
/// running does not replay progress that happened before.
pub struct JobStateMachine {
    settings: ReportSettings,
    state: JobTrackingState,
}

impl JobStateMachine {
    pub fn new(settings: ReportSettings) -> Self {
        Self {
            settings,
            state: JobTrackingState::default(),
        }
    }

    pub fn tracking(&self) -> &JobTrackingState {
        &self.state
    }

    /// Forget everything, so the next status primes again.
    pub fn reset(&mut self) {
        self.state = JobTrackingState::default();
    }

    /// Process one status and return the event it triggers, if any.
    pub fn process(&mut self, status: &NormalizedStatus) -> Option<NotificationEvent> {
        self.detect(status).map(|kind| NotificationEvent {
            kind,
            status: status.clone(),
        })
    }

    fn detect(&mut self, status: &NormalizedStatus) -> Option<EventKind> {
        let current = status.state();

        if !self.state.is_primed {
            self.prime(status, current);
            return None;
        }

        let previous = self.state.last_gcode_state.replace(current.clone());
        if previous.as_ref() != Some(&current) {
            return self.on_transition(previous, &current);
        }

        if current != GcodeState::Running {
            return None;
        }

        self.check_progress(status)
    }

    fn prime(&mut self, status: &NormalizedStatus, current: GcodeState) {
        if current == GcodeState::Running {
            let layer = status.record.layer();
            self.state.reported_first_layer = layer > 1;
            self.state.reported_second_layer = layer > 2;
            self.state.mark_percentages_through(status.percent);
        }

        info!(
            "Primed on state {} at layer {} ({}%)",
            current,
            status.record.layer(),
            status.percent
        );
        self.state.last_gcode_state = Some(current);
        self.state.is_primed = true;
    }

    fn on_transition(
        &mut self,
        previous: Option<GcodeState>,
        current: &GcodeState,
    ) -> Option<EventKind> {
        info!(
            "State changed: {} -> {}",
            previous.as_ref().map(GcodeState::as_str).unwrap_or("<none>"),
            current
        );

        let (kind, enabled) = match current {
            GcodeState::Running if previous == Some(GcodeState::Pause) => {
                (EventKind::PrintResume, self.settings.resume)
            }
            GcodeState::Running => {
                self.state.reset_job();
                (EventKind::PrintStart, self.settings.start)
            }
            GcodeState::Finish => (EventKind::PrintFinish, self.settings.finish),
            GcodeState::Failed => (EventKind::PrintFailure, self.settings.failure),
            GcodeState::Pause => (EventKind::PrintPause, self.settings.pause),
            _ => return None,
        };

        if !enabled {
            debug!("{} is disabled, not reporting", kind);
            return None;
        }
        Some(kind)
    }

    fn check_progress(&mut self, status: &NormalizedStatus) -> Option<EventKind> {
        let layer = status.record.layer();

        if self.settings.first_layer && !self.state.reported_first_layer && layer > 1 {
            self.state.reported_first_layer = true;
            debug!("First layer complete");
            return Some(EventKind::ProgressReport);
        }

        if self.settings.second_layer && !self.state.reported_second_layer && layer > 2 {
            self.state.reported_second_layer = true;
            debug!("Second layer complete");
            return Some(EventKind::ProgressReport);
        }

        let threshold = self
            .settings
            .percentages
            .iter()
            .copied()
            .find(|t| status.percent >= *t && !self.state.reported_percentages.contains(t))?;

        self.state.mark_percentages_through(threshold);
        debug!("Reached {}% (threshold {}%)", status.percent, threshold);
        Some(EventKind::ProgressReport)
    }
}
