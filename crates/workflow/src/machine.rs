//! The swap workflow as a pure transition table.
//!
//! `Machine::dispatch` mutates state and context and returns the effects the
//! runtime must execute; it never performs I/O itself.

use shared::{
    domain::{CatalogIndex, ImageHandle},
    error::TransferFailure,
};
use tracing::{debug, error, info, warn};
use transfer_core::SubmitOutcome;

use crate::{
    config::WorkflowConfig,
    events::{
        classify_submission_failure, Effect, Event, FailureKind, Intent, TimerKind,
        API_UNREACHABLE, CATALOG_UNAVAILABLE, FIRST_DETECTION_FAILURE, GENERIC_FAILURE,
        REPEATED_DETECTION_FAILURE, TOO_MANY_DETECTION_FAILURES,
    },
    state::{OrchestratorContext, WorkflowSnapshot, WorkflowState},
};

#[derive(Debug)]
pub struct Machine {
    state: WorkflowState,
    ctx: OrchestratorContext,
    config: WorkflowConfig,
}

impl Machine {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            state: WorkflowState::DetectingDevice,
            ctx: OrchestratorContext::default(),
            config,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot::capture(self.state, &self.ctx)
    }

    /// Effects for entering the initial state.
    pub fn start(&mut self) -> Vec<Effect> {
        vec![self.schedule(TimerKind::DetectionDelay)]
    }

    pub fn dispatch(&mut self, event: Event) -> Vec<Effect> {
        if self.state.is_terminal() {
            debug!(event = event.name(), "event ignored in terminal state");
            return Vec::new();
        }

        let effects = match (self.state, event) {
            (_, Event::CameraReady) => {
                self.ctx.camera_ready = true;
                Vec::new()
            }
            (_, Event::FacesDetected(count)) => {
                self.ctx.faces_on_camera = count;
                Vec::new()
            }
            (_, Event::TimerFired { timer, epoch }) if epoch != self.ctx.timer_epoch => {
                debug!(?timer, epoch, "stale timer ignored");
                Vec::new()
            }

            (
                WorkflowState::DetectingDevice,
                Event::TimerFired {
                    timer: TimerKind::DetectionDelay,
                    ..
                },
            ) => vec![Effect::DetectDevice],
            (WorkflowState::DetectingDevice, Event::DeviceDetected { available }) => {
                info!(available, "device detection resolved");
                self.ctx.device_available = available;
                self.state = WorkflowState::ShowingDetectionResult;
                vec![self.schedule(TimerKind::DetectionResult)]
            }
            (
                WorkflowState::ShowingDetectionResult,
                Event::TimerFired {
                    timer: TimerKind::DetectionResult,
                    ..
                },
            ) => {
                self.state = WorkflowState::LoadingCatalog;
                vec![Effect::FetchCatalog]
            }
            (WorkflowState::LoadingCatalog, Event::CatalogLoaded(Some(items))) => {
                self.ctx.catalog_items = items;
                self.state = WorkflowState::AwaitingSelection;
                Vec::new()
            }
            (WorkflowState::LoadingCatalog, Event::CatalogLoaded(None)) => {
                self.ctx.api_healthy = false;
                self.ctx.error_message = Some(CATALOG_UNAVAILABLE.into());
                Vec::new()
            }

            (WorkflowState::AwaitingSelection, Event::Intent(Intent::PickImage(index))) => {
                self.pick(index)
            }
            (
                WorkflowState::AwaitingSelection
                | WorkflowState::ShowingCapturePreview
                | WorkflowState::ShowingCapturedFrame
                | WorkflowState::Submitting,
                Event::Intent(Intent::Unpick { position }),
            ) => self.unpick(position),

            (WorkflowState::ShowingCapturePreview, Event::Intent(Intent::CaptureFrame)) => {
                if self.config.require_single_face && self.ctx.faces_on_camera != 1 {
                    warn!(
                        faces = self.ctx.faces_on_camera,
                        "capture refused: exactly one face required"
                    );
                    return Vec::new();
                }
                self.ctx.captured_frame = None;
                self.state = WorkflowState::ShowingCapturedFrame;
                vec![Effect::CaptureFrame]
            }
            (WorkflowState::ShowingCapturedFrame, Event::FrameGrabbed(frame)) => {
                if frame.is_none() {
                    warn!("frame grab returned nothing; confirm will be ignored");
                }
                self.ctx.captured_frame = frame;
                Vec::new()
            }
            (WorkflowState::ShowingCapturedFrame, Event::Intent(Intent::ConfirmCapture)) => {
                self.confirm_capture()
            }
            (WorkflowState::ShowingCapturedFrame, Event::Intent(Intent::DiscardCapture)) => {
                self.ctx.captured_frame = None;
                self.state = WorkflowState::ShowingCapturePreview;
                Vec::new()
            }

            (_, Event::SubmissionCompleted { submission, .. })
                if submission != self.ctx.submission =>
            {
                debug!(submission, "completion of a superseded submission ignored");
                Vec::new()
            }
            (WorkflowState::Submitting, Event::SubmissionCompleted { outcome, .. }) => {
                self.on_submission(outcome)
            }

            (
                WorkflowState::ShowingError,
                Event::TimerFired {
                    timer: TimerKind::ErrorDisplay,
                    ..
                }
                | Event::Intent(Intent::AcknowledgeError),
            ) => {
                self.ctx.error_message = None;
                self.ctx.reset_selection();
                self.state = WorkflowState::AwaitingSelection;
                Vec::new()
            }
            (WorkflowState::ShowingResult, Event::Intent(Intent::Restart)) => {
                self.ctx.reset_selection();
                self.state = WorkflowState::AwaitingSelection;
                Vec::new()
            }

            (state, event) => {
                debug!(?state, event = event.name(), "event ignored");
                Vec::new()
            }
        };

        if !self.ctx.api_healthy {
            self.terminate();
            return Vec::new();
        }
        effects
    }

    /// Releases every handle the machine owns. Idempotent.
    pub fn teardown(&mut self) {
        self.ctx.release_all();
    }

    fn schedule(&mut self, timer: TimerKind) -> Effect {
        self.ctx.timer_epoch += 1;
        Effect::ScheduleTimer {
            timer,
            epoch: self.ctx.timer_epoch,
            delay: self.config.delay_for(timer),
        }
    }

    fn pick(&mut self, index: CatalogIndex) -> Vec<Effect> {
        let in_range = index.0 >= 1 && (index.0 as usize) <= self.ctx.catalog_items.len();
        if !in_range || self.ctx.selected_indexes.contains(&index) {
            warn!(%index, "pick ignored: out of range or already selected");
            return Vec::new();
        }
        if self.ctx.selected_indexes.len() >= self.ctx.selection_capacity() {
            warn!(%index, "pick ignored: selection is full");
            return Vec::new();
        }
        self.ctx.selected_indexes.push(index);

        if self.ctx.device_available {
            self.ctx.faces_on_camera = 0;
            self.state = WorkflowState::ShowingCapturePreview;
            if self.ctx.capture_started {
                vec![Effect::ResumeCapture]
            } else {
                self.ctx.capture_started = true;
                vec![Effect::StartCapture]
            }
        } else if let [first, second] = self.ctx.selected_indexes[..] {
            self.state = WorkflowState::Submitting;
            vec![Effect::SubmitIndexPair {
                submission: self.next_submission(),
                first: second,
                second: first,
            }]
        } else {
            Vec::new()
        }
    }

    fn unpick(&mut self, position: usize) -> Vec<Effect> {
        if position >= self.ctx.selected_indexes.len() {
            warn!(position, "unpick ignored: no selection at that position");
            return Vec::new();
        }
        self.ctx.selected_indexes.remove(position);

        let effects = match self.state {
            WorkflowState::Submitting if self.ctx.device_available => {
                vec![Effect::CancelTransfers, Effect::PauseCapture]
            }
            WorkflowState::Submitting => vec![Effect::CancelTransfers],
            WorkflowState::ShowingCapturePreview | WorkflowState::ShowingCapturedFrame => {
                self.ctx.captured_frame = None;
                vec![Effect::PauseCapture]
            }
            _ => Vec::new(),
        };
        self.state = WorkflowState::AwaitingSelection;
        effects
    }

    fn confirm_capture(&mut self) -> Vec<Effect> {
        let Some(&partner) = self.ctx.selected_indexes.first() else {
            warn!("confirm ignored: nothing selected");
            return Vec::new();
        };
        let Some(frame) = self.ctx.captured_frame.take() else {
            warn!("confirm ignored: no frame was captured");
            return Vec::new();
        };
        self.state = WorkflowState::Submitting;
        vec![
            Effect::SubmitFrame {
                submission: self.next_submission(),
                frame,
                partner,
            },
            Effect::PauseCapture,
        ]
    }

    fn next_submission(&mut self) -> u64 {
        self.ctx.submission += 1;
        self.ctx.submission
    }

    fn on_submission(&mut self, outcome: SubmitOutcome) -> Vec<Effect> {
        match outcome {
            Ok(handle) => {
                self.store_result(handle);
                self.ctx.error_counts.transport_errors = 0;
                self.ctx.error_message = None;
                self.state = WorkflowState::ShowingResult;
                Vec::new()
            }
            Err(failure) => self.on_submission_failure(&failure),
        }
    }

    fn store_result(&mut self, handle: ImageHandle) {
        self.ctx.release_result();
        self.ctx.result_handle = Some(handle);
    }

    fn on_submission_failure(&mut self, failure: &TransferFailure) -> Vec<Effect> {
        let counts = &mut self.ctx.error_counts;
        let kind = classify_submission_failure(failure, &self.config.detection_error_message);
        let message = match kind {
            FailureKind::FaceNotDetected => {
                if counts.detection_errors >= self.config.max_detection_errors {
                    counts.detection_errors = 0;
                    self.ctx.device_available = false;
                    info!("detection error ceiling reached; switching to image swapping");
                    TOO_MANY_DETECTION_FAILURES
                } else {
                    counts.detection_errors += 1;
                    if counts.detection_errors == 1 {
                        FIRST_DETECTION_FAILURE
                    } else {
                        REPEATED_DETECTION_FAILURE
                    }
                }
            }
            FailureKind::Transport => {
                counts.transport_errors += 1;
                warn!(count = counts.transport_errors, "submission failed: {failure}");
                if counts.transport_errors >= self.config.max_transport_errors {
                    self.ctx.api_healthy = false;
                }
                GENERIC_FAILURE
            }
        };

        self.ctx.error_message = Some(message.into());
        self.state = WorkflowState::ShowingError;
        vec![self.schedule(TimerKind::ErrorDisplay)]
    }

    fn terminate(&mut self) {
        if self.state != WorkflowState::Terminated {
            error!("swap service marked unhealthy; workflow terminated");
        }
        self.state = WorkflowState::Terminated;
        if self.ctx.error_message.as_deref() != Some(CATALOG_UNAVAILABLE) {
            self.ctx.error_message = Some(API_UNREACHABLE.into());
        }
    }
}

#[cfg(test)]
#[path = "tests/machine_tests.rs"]
mod tests;
